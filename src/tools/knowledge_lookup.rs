//! 知识库检索能力（rag_retrieval）：规划阶段按需查询旅游知识库

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::KnowledgeBase;
use crate::tools::Tool;

pub struct KnowledgeLookupTool {
    knowledge: Arc<dyn KnowledgeBase>,
    k: usize,
}

impl KnowledgeLookupTool {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>, k: usize) -> Self {
        Self {
            knowledge,
            k: k.max(1),
        }
    }
}

#[async_trait]
impl Tool for KnowledgeLookupTool {
    fn name(&self) -> &str {
        "rag_retrieval"
    }

    fn description(&self) -> &str {
        "Look up the travel knowledge base (local guides, tips, notes). Args: {\"query\": \"北海道 滑雪 初學者\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| "query is required".to_string())?;
        let docs = self.knowledge.search(query, self.k).await;
        let out = json!({
            "query": query,
            "source": "knowledge_base",
            "results": docs,
        });
        serde_json::to_string_pretty(&out).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKnowledge;

    #[tokio::test]
    async fn test_lookup_returns_ranked_documents() {
        let kb = InMemoryKnowledge::new(0.0);
        kb.add("台中美食", "逢甲夜市 宮原眼科 台中 美食");
        kb.add("北海道滑雪", "二世谷 滑雪 初學者");
        let tool = KnowledgeLookupTool::new(Arc::new(kb), 3);

        let v: Value =
            serde_json::from_str(&tool.execute(json!({"query": "台中 美食"})).await.unwrap()).unwrap();
        assert_eq!(v["results"][0]["title"], "台中美食");
        assert_eq!(v["results"].as_array().unwrap().len(), 1);

        let v: Value =
            serde_json::from_str(&tool.execute(json!({"query": "火星"})).await.unwrap()).unwrap();
        assert!(v["results"].as_array().unwrap().is_empty());
        assert!(tool.execute(json!({})).await.is_err());
    }
}
