//! 调试输出（repr 文本）的宽松提取
//!
//! 模型偶尔把结构化对象的调试表示当作回复输出，例如：
//! `Returning structured response: 查詢地點='台中' 天氣預報=[WeatherItem(日期='2024-05-01', 溫度='25°C')] 整體分析='晴'`
//! 这里把这类文本解析为 JSON 值：顶层只收集 `字段=值`，无法识别的片段直接跳过；
//! 列表中的每个嵌套对象单独提取，某一项坏掉不影响其他项。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

/// 嵌套层数上限，超过的值整体跳过（与 serde_json 的递归上限一致）
const MAX_NESTING: usize = 128;

/// 调试前缀（"Returning structured response:" 及其变体）
pub fn debug_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)returning\s+structured\s+(?:response|value|output|data)\s*[:：]")
            .expect("valid debug prefix regex")
    })
}

/// 去掉调试前缀，返回其后的文本；没有前缀返回 None
pub fn strip_debug_prefix(text: &str) -> Option<&str> {
    debug_prefix_re().find(text).map(|m| &text[m.end()..])
}

/// 解析 repr 文本；顶层若只有一个 `Name(...)` 调用则取其关键字参数
pub fn parse_repr(text: &str) -> Value {
    let mut p = Parser::new(text);
    let fields = p.top_level();
    if fields.is_empty() {
        p = Parser::new(text);
        p.skip_ws();
        if let Some(Value::Object(map)) = p.value() {
            return Value::Object(map);
        }
    }
    Value::Object(fields)
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn byte_offset(&self, pos: usize) -> usize {
        self.chars
            .get(pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.src.len())
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn is_ident_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c == '.'
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        while self.peek().is_some_and(Self::is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        Some(self.chars[start..self.pos].iter().map(|(_, c)| c).collect())
    }

    /// 顶层：收集所有 `ident=value`；单个 `Name(...)` 会被展开
    fn top_level(&mut self) -> Map<String, Value> {
        let mut out = Map::new();
        while self.pos < self.chars.len() {
            let start = self.pos;
            self.skip_ws();
            if let Some(name) = self.ident() {
                self.skip_ws();
                if self.eat('=') {
                    self.skip_ws();
                    match self.value() {
                        Some(v) => {
                            out.insert(name, v);
                        }
                        None => self.skip_value(),
                    }
                    continue;
                }
                if self.peek() == Some('(') && out.is_empty() {
                    self.pos += 1;
                    let kwargs = self.call_args();
                    if !kwargs.is_empty() {
                        return kwargs;
                    }
                    continue;
                }
            }
            if self.pos == start {
                self.pos += 1;
            }
        }
        out
    }

    /// 在 `(` 之后解析参数直到 `)`；只保留关键字参数
    fn call_args(&mut self) -> Map<String, Value> {
        let mut kwargs = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            let save = self.pos;
            if let Some(name) = self.ident() {
                self.skip_ws();
                if self.eat('=') {
                    self.skip_ws();
                    match self.value() {
                        Some(v) => {
                            kwargs.insert(name, v);
                        }
                        None => self.skip_value(),
                    }
                    continue;
                }
            }
            self.pos = save;
            if self.value().is_none() {
                self.skip_value();
                if self.pos == save {
                    self.pos += 1;
                }
            }
        }
        kwargs
    }

    /// 进入一层嵌套；超过上限返回 None，由调用方跳过该值
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> T) -> Option<T> {
        if self.depth >= MAX_NESTING {
            return None;
        }
        self.depth += 1;
        let out = parse(self);
        self.depth -= 1;
        Some(out)
    }

    fn value(&mut self) -> Option<Value> {
        match self.peek()? {
            '\'' | '"' => self.string().map(Value::String),
            '[' => self.nested(|p| p.sequence('[', ']')),
            '(' => self.nested(|p| p.sequence('(', ')')),
            '{' => self.nested(Self::dict).flatten(),
            '<' => self.angle().map(Value::String),
            c if c == '-' || c.is_ascii_digit() => self.number(),
            c if Self::is_ident_char(c) => {
                let start = self.pos;
                let name = self.ident()?;
                if self.peek() == Some('(') {
                    if self.depth >= MAX_NESTING {
                        self.pos = start;
                        return None;
                    }
                    self.pos += 1;
                    let kwargs = self.nested(Self::call_args)?;
                    if kwargs.is_empty() {
                        // date(2024, 5, 1) 之类没有关键字参数的调用保留原文
                        let raw = &self.src[self.byte_offset(start)..self.byte_offset(self.pos)];
                        return Some(Value::String(raw.to_string()));
                    }
                    return Some(Value::Object(kwargs));
                }
                match name.as_str() {
                    "True" | "true" => Some(Value::Bool(true)),
                    "False" | "false" => Some(Value::Bool(false)),
                    "None" | "null" => Some(Value::Null),
                    _ => Some(Value::String(name)),
                }
            }
            _ => None,
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.peek()?;
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == quote {
                return Some(out);
            }
            if c == '\\' {
                let escaped = self.peek()?;
                self.pos += 1;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            } else {
                out.push(c);
            }
        }
        None
    }

    /// `<Level.HIGH: 'high'>`、`<object at 0x..>` 之类保留原文
    fn angle(&mut self) -> Option<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == '>' {
                let raw = &self.src[self.byte_offset(start)..self.byte_offset(self.pos)];
                return Some(raw.to_string());
            }
        }
        None
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        self.eat('-');
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E')
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().map(|(_, c)| c).collect();
        if let Ok(n) = raw.parse::<i64>() {
            return Some(Value::from(n));
        }
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    }

    /// 列表 / 元组：逐项解析，坏项跳过
    fn sequence(&mut self, open: char, close: char) -> Value {
        let _ = self.eat(open);
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(c) if c == close => {
                    self.pos += 1;
                    break;
                }
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            let before = self.pos;
            match self.value() {
                Some(v) => items.push(v),
                None => {
                    self.skip_value();
                    if self.pos == before {
                        self.pos += 1;
                    }
                }
            }
        }
        Value::Array(items)
    }

    fn dict(&mut self) -> Option<Value> {
        let _ = self.eat('{');
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            let before = self.pos;
            let key = match self.value() {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => {
                    self.skip_value();
                    if self.pos == before {
                        self.pos += 1;
                    }
                    continue;
                }
            };
            self.skip_ws();
            if !self.eat(':') {
                continue;
            }
            self.skip_ws();
            match self.value() {
                Some(v) => {
                    map.insert(key, v);
                }
                None => self.skip_value(),
            }
        }
        Some(Value::Object(map))
    }

    /// 跳过一个无法识别的值：直到同层的 `,` 或闭合括号（不消费该闭合括号）
    fn skip_value(&mut self) {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '\'' | '"' => {
                    if self.string().is_none() {
                        return;
                    }
                    continue;
                }
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                ',' if depth == 0 => return,
                c if c.is_whitespace() && depth == 0 => return,
                _ => {}
            }
            self.pos += 1;
        }
    }
}
