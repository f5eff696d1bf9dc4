//! 结构化输出恢复
//!
//! - `table`：声明式 Schema（字段表）与规整
//! - `record`：恢复结果 `Record`
//! - `repr`：调试前缀文本的宽松提取
//! - `recover`：逐层恢复，永不失败
//! - `travel`：旅行助手的各类记录声明

pub mod record;
pub mod recover;
pub mod repr;
pub mod table;
pub mod travel;

pub use record::Record;
pub use recover::{recover, recover_with_source, strip_code_fences, RecoverySource};
pub use table::{conform, ConformError, FieldDefault, FieldKind, FieldSpec, Schema};
