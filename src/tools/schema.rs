//! 工具参数 JSON Schema 生成与参数解码（schemars 自动生成工具 Schema）
//!
//! 每个工具的参数是一个 derive(JsonSchema, Deserialize) 结构体：schema 交给 LLM function calling，
//! 同一个结构体用于解码 LLM 给出的参数，保证两边一致。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 生成参数 schema；去掉 $schema / title 等 function calling 不需要的顶层键
pub fn args_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({"type": "object", "properties": {}})
    });
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
        map.entry("type").or_insert_with(|| Value::String("object".into()));
    }
    value
}

/// 解码参数；null 视为空对象，失败时返回可读的错误信息（写入 ToolOutput.error）
pub fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    /// 测试用参数
    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Args {
        /// 查询
        query: String,
        #[serde(default)]
        top_k: Option<u32>,
    }

    #[test]
    fn test_schema_is_plain_object_schema() {
        let schema = args_schema::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert!(schema["properties"]["query"].is_object());
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn test_decode_args_errors_are_readable() {
        let err = decode_args::<Args>(json!({"top_k": 3})).err().unwrap();
        assert!(err.starts_with("Invalid arguments"));
        assert!(err.contains("query"));
        let ok: Args = decode_args(json!({"query": "q"})).unwrap();
        assert_eq!(ok.query, "q");
        assert!(decode_args::<Args>(Value::Null).is_err());
    }
}
