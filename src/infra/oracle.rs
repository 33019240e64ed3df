//! OpenAI 兼容的 chat/completions 客户端，通过工具调用获取结构化意图

use crate::config::OracleSettings;
use crate::core::orchestrator::{Oracle, OracleError, OracleReply, OracleRequest};
use crate::models::intent::SqlToolArgs;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

const GENERATE_SQL: &str = "generate_sql";
const CANNOT_ANSWER: &str = "cannot_answer";

pub struct OpenAiOracle {
    client: reqwest::Client,
    settings: OracleSettings,
}

impl OpenAiOracle {
    pub fn new(settings: OracleSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn request_body(&self, request: &OracleRequest) -> Value {
        json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": system_prompt(&request.schema_context) },
                { "role": "user", "content": request.user_question },
            ],
            "tools": tools(),
            "tool_choice": "auto",
            "temperature": 0.1,
        })
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn call(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| OracleError::NotConfigured("OPENAI_API_KEY is not set".into()))?;

        debug!(model = %self.settings.model, "调用语言模型");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.settings.base_url))
            .bearer_auth(api_key)
            .timeout(self.settings.timeout)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: Value = response
            .json()
            .await
            .map_err(|e| OracleError::Transport(format!("invalid completion body: {}", e)))?;
        Ok(parse_completion(&completion))
    }
}

fn system_prompt(schema_context: &str) -> String {
    format!(
        "You are a SQL query assistant. Your job is to help users query their data using natural language.\n\n\
         {}\n\
         Instructions:\n\
         1. Answer by calling the {} function with a single read-only SELECT (or WITH ... SELECT) statement\n\
         2. Always use proper JOIN syntax when connecting related tables\n\
         3. Use aggregation functions (SUM, COUNT, AVG, etc.) and GROUP BY when needed\n\
         4. Include WHERE clauses for filtering, and proper date filtering for time-based questions\n\
         5. Never generate INSERT, UPDATE, DELETE, DROP or any other statement that changes data\n\
         6. Be specific with table and column names from the schema\n\
         7. Suggest the chart that best fits the result in chart_suggestion\n\
         8. If the question cannot be answered from these tables, call {} with a short reason\n\n\
         Remember: you can only query the tables and columns that exist in the schema above.",
        schema_context, GENERATE_SQL, CANNOT_ANSWER
    )
}

fn tools() -> Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": GENERATE_SQL,
                "description": "Generate a SQL query that answers the user's question",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "sql_query": { "type": "string", "description": "A single SELECT statement" },
                        "explanation": { "type": "string", "description": "What the query does, in plain language" },
                        "tables_used": { "type": "array", "items": { "type": "string" } },
                        "chart_suggestion": {
                            "type": "object",
                            "properties": {
                                "chart_type": {
                                    "type": "string",
                                    "enum": ["bar", "line", "pie", "scatter", "table", "single_value"]
                                },
                                "reason": { "type": "string" },
                                "title": { "type": "string" }
                            }
                        }
                    },
                    "required": ["sql_query", "explanation"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": CANNOT_ANSWER,
                "description": "Signal that the question cannot be answered from this database",
                "parameters": {
                    "type": "object",
                    "properties": { "reason": { "type": "string" } },
                    "required": ["reason"]
                }
            }
        }
    ])
}

/// 解析 completion 响应；兼容 tool_calls 与旧版 function_call
pub fn parse_completion(completion: &Value) -> OracleReply {
    let message = &completion["choices"][0]["message"];
    let call = message["tool_calls"][0]
        .get("function")
        .or_else(|| message.get("function_call"));

    let Some(call) = call else {
        let text = message["content"].as_str().map(str::to_string);
        return OracleReply::Malformed { raw_text: text };
    };

    let name = call["name"].as_str().unwrap_or_default();
    // arguments 通常是 JSON 字符串，个别兼容服务直接返回对象
    let arguments = match &call["arguments"] {
        Value::String(raw) => serde_json::from_str::<Value>(raw).ok(),
        Value::Object(_) => Some(call["arguments"].clone()),
        _ => None,
    };
    let Some(arguments) = arguments else {
        warn!(function = name, "工具调用参数不是合法 JSON");
        return OracleReply::Malformed { raw_text: None };
    };

    match name {
        GENERATE_SQL => match serde_json::from_value::<SqlToolArgs>(arguments) {
            Ok(args) => OracleReply::SqlIntent(args),
            Err(e) => {
                warn!(error = %e, "generate_sql 参数缺失字段");
                OracleReply::Malformed { raw_text: None }
            }
        },
        CANNOT_ANSWER => OracleReply::CannotAnswer {
            reason: arguments["reason"].as_str().unwrap_or_default().to_string(),
        },
        other => {
            warn!(function = other, "模型调用了未知工具");
            OracleReply::Malformed { raw_text: None }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_call(name: &str, arguments: &str) -> Value {
        json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": name, "arguments": arguments }
                    }]
                }
            }]
        })
    }

    #[test]
    fn generate_sql_call_becomes_intent() {
        let reply = parse_completion(&tool_call(
            "generate_sql",
            r#"{"sql_query":"SELECT category, SUM(total) FROM orders GROUP BY category",
                "explanation":"Revenue per category","tables_used":["orders"],
                "chart_suggestion":{"chart_type":"bar","title":"Revenue"}}"#,
        ));
        match reply {
            OracleReply::SqlIntent(args) => {
                assert!(args.sql_query.starts_with("SELECT category"));
                assert_eq!(args.tables_used, vec!["orders".to_string()]);
                let chart = args.chart_suggestion.unwrap();
                assert_eq!(chart.chart_type.as_deref(), Some("bar"));
                assert_eq!(chart.reason, None);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn legacy_function_call_with_query_alias() {
        let completion = json!({
            "choices": [{ "message": { "function_call": {
                "name": "generate_sql",
                "arguments": "{\"query\":\"SELECT 1\",\"explanation\":\"one\"}"
            }}}]
        });
        match parse_completion(&completion) {
            OracleReply::SqlIntent(args) => assert_eq!(args.sql_query, "SELECT 1"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn cannot_answer_call_is_recognized() {
        match parse_completion(&tool_call("cannot_answer", r#"{"reason":"no weather data"}"#)) {
            OracleReply::CannotAnswer { reason } => assert_eq!(reason, "no weather data"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn plain_text_and_broken_arguments_are_malformed() {
        let text = json!({ "choices": [{ "message": { "content": "Sure! Try SELECT * FROM orders" } }] });
        match parse_completion(&text) {
            OracleReply::Malformed { raw_text } => {
                assert_eq!(raw_text.as_deref(), Some("Sure! Try SELECT * FROM orders"))
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            parse_completion(&tool_call("generate_sql", "{not json")),
            OracleReply::Malformed { .. }
        ));
        assert!(matches!(
            parse_completion(&tool_call("generate_sql", r#"{"explanation":"no sql"}"#)),
            OracleReply::Malformed { .. }
        ));
        assert!(matches!(
            parse_completion(&tool_call("drop_everything", "{}")),
            OracleReply::Malformed { .. }
        ));
    }

    #[tokio::test]
    async fn missing_api_key_is_not_configured() {
        let oracle = OpenAiOracle::new(OracleSettings::default());
        let request = OracleRequest {
            schema_context: String::new(),
            user_question: "q".into(),
        };
        let err = oracle.call(&request).await.unwrap_err();
        assert!(matches!(err, OracleError::NotConfigured(_)));
    }

    #[test]
    fn request_carries_schema_and_tools() {
        let oracle = OpenAiOracle::new(OracleSettings::default());
        let body = oracle.request_body(&OracleRequest {
            schema_context: "Tables:\nTable 'orders': id integer PK".into(),
            user_question: "how many orders?".into(),
        });
        assert_eq!(body["messages"][1]["content"], "how many orders?");
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("Table 'orders'"));
        assert_eq!(body["tools"].as_array().unwrap().len(), 2);
    }
}
