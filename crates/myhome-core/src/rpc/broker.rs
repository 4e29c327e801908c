// ── RPC method registry ──
//
// Verbs map to type-erased async handlers. Registration captures the
// params and result types through serde, so every surface (in-process,
// MQTT, HTTP) goes through the same decode/encode path.

use std::any::type_name;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CoreError;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Handler = Arc<dyn Fn(Value) -> BoxFuture<Result<Value, CoreError>> + Send + Sync>;

/// Params type for verbs that take no arguments. Extra fields are ignored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Empty {}

/// Description of one registered verb, as returned by `server.methods`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub params: String,
    pub result: String,
}

struct Entry {
    info: MethodInfo,
    handler: Handler,
}

/// Collects registrations; duplicates surface when [`build`](Self::build) runs.
#[derive(Default)]
pub struct BrokerBuilder {
    methods: IndexMap<String, Entry>,
    duplicate: Option<String>,
}

impl BrokerBuilder {
    pub fn register<P, R, F, Fut>(mut self, verb: &str, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, CoreError>> + Send + 'static,
    {
        if self.methods.contains_key(verb) {
            self.duplicate.get_or_insert_with(|| verb.to_owned());
            return self;
        }
        let name = verb.to_owned();
        let handler = Arc::new(handler);
        let erased: Handler = Arc::new(move |params: Value| -> BoxFuture<Result<Value, CoreError>> {
            let name = name.clone();
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let params: P = decode_params(&name, params)?;
                let result = handler(params).await?;
                Ok(serde_json::to_value(result)?)
            })
        });
        self.methods.insert(
            verb.to_owned(),
            Entry {
                info: MethodInfo {
                    name: verb.to_owned(),
                    params: short_type_name::<P>(),
                    result: short_type_name::<R>(),
                },
                handler: erased,
            },
        );
        self
    }

    pub fn build(self) -> Result<Broker, CoreError> {
        if let Some(method) = self.duplicate {
            return Err(CoreError::DuplicateMethod { method });
        }
        Ok(Broker {
            methods: self.methods,
        })
    }
}

/// The immutable verb table shared by every RPC surface.
pub struct Broker {
    methods: IndexMap<String, Entry>,
}

impl Broker {
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::default()
    }

    pub async fn call(&self, verb: &str, params: Value) -> Result<Value, CoreError> {
        let entry = self
            .methods
            .get(verb)
            .ok_or_else(|| CoreError::MethodNotFound {
                method: verb.to_owned(),
            })?;
        debug!(method = verb, "dispatching rpc");
        (entry.handler)(params).await
    }

    /// Typed convenience over [`call`](Self::call).
    pub async fn call_typed<P: Serialize, R: DeserializeOwned>(
        &self,
        verb: &str,
        params: &P,
    ) -> Result<R, CoreError> {
        let value = self.call(verb, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn contains(&self, verb: &str) -> bool {
        self.methods.contains_key(verb)
    }

    /// Registered verbs, sorted by name.
    pub fn methods(&self) -> Vec<MethodInfo> {
        let mut list: Vec<MethodInfo> = self.methods.values().map(|e| e.info.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

/// Null params decode as `{}` so argument-less verbs accept both.
fn decode_params<P: DeserializeOwned>(method: &str, params: Value) -> Result<P, CoreError> {
    let params = if params.is_null() {
        Value::Object(Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| CoreError::InvalidParams {
        method: method.to_owned(),
        reason: e.to_string(),
    })
}

fn short_type_name<T>() -> String {
    let full = type_name::<T>();
    // `alloc::vec::Vec<myhome_core::model::Room>` -> `Vec<Room>`
    let mut out = String::with_capacity(full.len());
    for (i, segment) in full.split("::").enumerate() {
        if i > 0 && out.ends_with(|c: char| c.is_alphanumeric() || c == '_') {
            let cut = out
                .rfind(|c: char| !(c.is_alphanumeric() || c == '_'))
                .map_or(0, |p| p + 1);
            out.truncate(cut);
        }
        out.push_str(segment);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    fn broker() -> Broker {
        Broker::builder()
            .register("math.add", |p: Add| async move { Ok(p.a + p.b) })
            .register("server.ping", |_: Empty| async { Ok("pong") })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn dispatches_typed_handler() {
        let b = broker();
        let out = b.call("math.add", json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(out, json!(5));
        let out = b.call("server.ping", Value::Null).await.unwrap();
        assert_eq!(out, json!("pong"));
    }

    #[tokio::test]
    async fn unknown_verb_and_bad_params() {
        let b = broker();
        let err = b.call("math.sub", json!({})).await.unwrap_err();
        assert_eq!(err.rpc_code(), -32601);
        let err = b.call("math.add", json!({"a": "two"})).await.unwrap_err();
        assert_eq!(err.rpc_code(), -32602);
    }

    #[test]
    fn duplicate_verb_fails_build() {
        let result = Broker::builder()
            .register("server.ping", |_: Empty| async { Ok(1) })
            .register("server.ping", |_: Empty| async { Ok(2) })
            .build();
        assert!(matches!(result, Err(CoreError::DuplicateMethod { .. })));
    }

    #[test]
    fn method_listing_uses_short_type_names() {
        let names: Vec<String> = broker().methods().into_iter().map(|m| m.params).collect();
        assert_eq!(names, vec!["Add", "Empty"]);
        assert_eq!(short_type_name::<Vec<String>>(), "Vec<String>");
    }
}
