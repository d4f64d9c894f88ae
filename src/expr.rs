//! Server-side expression graphs.
//!
//! Nothing here is evaluated locally: an [`Expr`] tree is encoded into the
//! `Expression` document the REST API evaluates (`{"result": id, "values": {...}}`).
//! Function bodies are referenced by id, so [`Expression::new`] hoists each
//! lambda body into the shared `values` table while encoding.
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const ROOT_ID: &str = "0";

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Constant(Value),
    Call {
        function: String,
        args: BTreeMap<String, Expr>,
    },
    ArgRef(String),
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Array(Vec<Expr>),
    Dict(BTreeMap<String, Expr>),
}

pub fn constant(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

pub fn call<const N: usize>(function: &str, args: [(&str, Expr); N]) -> Expr {
    Expr::Call {
        function: function.to_string(),
        args: args
            .into_iter()
            .map(|(name, e)| (name.to_string(), e))
            .collect(),
    }
}

pub fn arg(name: &str) -> Expr {
    Expr::ArgRef(name.to_string())
}

pub fn lambda(params: &[&str], body: Expr) -> Expr {
    Expr::Lambda {
        params: params.iter().map(|p| p.to_string()).collect(),
        body: Box::new(body),
    }
}

pub fn array(items: Vec<Expr>) -> Expr {
    Expr::Array(items)
}

pub fn strings(items: &[&str]) -> Expr {
    constant(items.iter().map(|s| Value::from(*s)).collect::<Vec<_>>())
}

impl Expr {
    fn encode(&self, values: &mut BTreeMap<String, Value>, next_id: &mut usize) -> Value {
        match self {
            Expr::Constant(v) => json!({ "constantValue": v }),
            Expr::ArgRef(name) => json!({ "argumentReference": name }),
            Expr::Call { function, args } => {
                let args: Map<String, Value> = args
                    .iter()
                    .map(|(k, e)| (k.clone(), e.encode(values, next_id)))
                    .collect();
                json!({
                    "functionInvocationValue": {
                        "functionName": function,
                        "arguments": args,
                    }
                })
            }
            Expr::Lambda { params, body } => {
                let node = body.encode(values, next_id);
                let id = next_id.to_string();
                *next_id += 1;
                values.insert(id.clone(), node);
                json!({
                    "functionDefinitionValue": {
                        "argumentNames": params,
                        "body": id,
                    }
                })
            }
            Expr::Array(items) => {
                let items: Vec<Value> = items.iter().map(|e| e.encode(values, next_id)).collect();
                json!({ "arrayValue": { "values": items } })
            }
            Expr::Dict(entries) => {
                let entries: Map<String, Value> = entries
                    .iter()
                    .map(|(k, e)| (k.clone(), e.encode(values, next_id)))
                    .collect();
                json!({ "dictionaryValue": { "values": entries } })
            }
        }
    }
}

/// Wire form of an expression graph.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Expression {
    pub result: String,
    pub values: BTreeMap<String, Value>,
}

impl Expression {
    pub fn new(root: &Expr) -> Self {
        let mut values = BTreeMap::new();
        let mut next_id = 1;
        let node = root.encode(&mut values, &mut next_id);
        values.insert(ROOT_ID.to_string(), node);
        Self {
            result: ROOT_ID.to_string(),
            values,
        }
    }
}

impl From<&Expr> for Expression {
    fn from(e: &Expr) -> Self {
        Expression::new(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_root() {
        let e = Expression::new(&constant(42));
        assert_eq!(e.result, "0");
        assert_eq!(e.values["0"], json!({"constantValue": 42}));
    }

    #[test]
    fn test_nested_call() {
        let e = call(
            "Collection.size",
            [(
                "collection",
                call("ImageCollection.load", [("id", constant("LANDSAT/LC08/C02/T1_L2"))]),
            )],
        );
        let encoded = Expression::new(&e);
        let root = &encoded.values["0"]["functionInvocationValue"];
        assert_eq!(root["functionName"], "Collection.size");
        assert_eq!(
            root["arguments"]["collection"]["functionInvocationValue"]["arguments"]["id"]
                ["constantValue"],
            "LANDSAT/LC08/C02/T1_L2"
        );
    }

    #[test]
    fn test_lambda_body_is_hoisted() {
        let body = call("Image.rename", [("input", arg("img")), ("names", strings(&["NDVI"]))]);
        let e = call(
            "Collection.map",
            [("collection", constant("c")), ("baseAlgorithm", lambda(&["img"], body))],
        );
        let encoded = Expression::new(&e);
        assert_eq!(encoded.values.len(), 2);

        let def = &encoded.values["0"]["functionInvocationValue"]["arguments"]["baseAlgorithm"]
            ["functionDefinitionValue"];
        assert_eq!(def["argumentNames"], json!(["img"]));
        let body_id = def["body"].as_str().unwrap();
        assert_eq!(
            encoded.values[body_id]["functionInvocationValue"]["arguments"]["input"],
            json!({"argumentReference": "img"})
        );
    }

    #[test]
    fn test_nested_lambdas_get_distinct_ids() {
        let inner = lambda(&["x"], arg("x"));
        let outer = lambda(&["y"], call("f", [("g", inner)]));
        let encoded = Expression::new(&outer);
        assert_eq!(encoded.values.len(), 3);
        assert!(encoded.values.contains_key("1"));
        assert!(encoded.values.contains_key("2"));
    }
}
