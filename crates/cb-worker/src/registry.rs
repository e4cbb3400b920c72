//! A concrete, minimal [`Evaluator`]: since Rust has no runtime able to
//! deserialize an arbitrary closure the way the source's dynamic language
//! can, the worker treats `expr` as a named call into a fixed registry of
//! Rust functions — `expr` decodes to `Value::List([Value::Str(name),
//! args...])`, `globals` decodes to a `Value::Map` of bindings visible to
//! every call. This keeps the dispatcher/session core's contract (expr is
//! an opaque blob it never inspects) while giving the worker binary
//! something it can actually run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use cb_codec::Value;
use cb_session::Evaluator;
use cb_types::{ResultEnvelope, TaskEnvelope};
use chrono::Utc;

type Func = dyn Fn(&[Value], &Value) -> std::result::Result<Value, String> + Send + Sync;

/// A named table of callable functions, looked up by the `name` in a
/// decoded `expr` call.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<Func>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, f: impl Fn(&[Value], &Value) -> std::result::Result<Value, String> + Send + Sync + 'static) {
        self.functions.insert(name.into(), Arc::new(f));
    }

    /// A registry preloaded with a handful of arithmetic builtins, enough
    /// to exercise the worker runtime end to end without a caller having to
    /// register anything.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("identity", |args, _globals| {
            args.first().cloned().ok_or_else(|| "identity requires one argument".into())
        });
        registry.register("square", |args, _globals| match args.first() {
            Some(Value::Int(n)) => Ok(Value::Int(n * n)),
            Some(Value::Float(f)) => Ok(Value::Float(f * f)),
            _ => Err("square requires one numeric argument".into()),
        });
        registry.register("add", |args, _globals| match (args.first(), args.get(1)) {
            (Some(Value::Int(a)), Some(Value::Int(b))) => Ok(Value::Int(a + b)),
            (Some(Value::Float(a)), Some(Value::Float(b))) => Ok(Value::Float(a + b)),
            _ => Err("add requires two numeric arguments of matching type".into()),
        });
        registry
    }
}

/// An [`Evaluator`] backed by a [`FunctionRegistry`].
pub struct RegistryEvaluator {
    registry: FunctionRegistry,
}

impl RegistryEvaluator {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Evaluator for RegistryEvaluator {
    async fn evaluate(&self, envelope: &TaskEnvelope) -> ResultEnvelope {
        let started_at = Utc::now();
        match self.run(envelope) {
            Ok(value) => {
                let finished_at = Utc::now();
                match cb_codec::encode(&value) {
                    Ok(bytes) => ResultEnvelope::ok(envelope.task_id, bytes, started_at, finished_at),
                    Err(e) => ResultEnvelope::failed(envelope.task_id, e.to_string(), None, started_at, finished_at),
                }
            }
            Err(message) => {
                let finished_at = Utc::now();
                ResultEnvelope::failed(envelope.task_id, message, None, started_at, finished_at)
            }
        }
    }
}

impl RegistryEvaluator {
    fn run(&self, envelope: &TaskEnvelope) -> std::result::Result<Value, String> {
        let (expr_bytes, globals_bytes): (Vec<u8>, Vec<u8>) =
            cb_codec::decode(&envelope.payload).map_err(|e| format!("malformed payload: {e}"))?;

        let call: Value = cb_codec::decode(&expr_bytes).map_err(|e| format!("malformed expr: {e}"))?;
        let globals: Value = if globals_bytes.is_empty() {
            Value::Map(BTreeMap::new())
        } else {
            cb_codec::decode(&globals_bytes).map_err(|e| format!("malformed globals: {e}"))?
        };

        let Value::List(mut items) = call else {
            return Err("expr must decode to a call list [name, args...]".into());
        };
        if items.is_empty() {
            return Err("expr call list is empty".into());
        }
        let name_value = items.remove(0);
        let name = name_value.as_str().ok_or("expr call's first element must be a function name string")?;

        let f = self
            .registry
            .functions
            .get(name)
            .ok_or_else(|| format!("no function registered for '{name}'"))?;
        f(&items, &globals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn envelope_for(call: Value, globals: Value) -> TaskEnvelope {
        let expr_bytes = cb_codec::encode(&call).unwrap();
        let globals_bytes = cb_codec::encode(&globals).unwrap();
        let payload = cb_codec::encode(&(expr_bytes, globals_bytes)).unwrap();
        TaskEnvelope {
            task_id: Uuid::new_v4(),
            session_id: None,
            payload,
            env: Default::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn square_builtin_computes_correctly() {
        let evaluator = RegistryEvaluator::new(FunctionRegistry::with_builtins());
        let call = Value::List(vec![Value::Str("square".into()), Value::Int(6)]);
        let envelope = envelope_for(call, Value::Map(BTreeMap::new()));

        let result = evaluator.evaluate(&envelope).await;
        assert!(!result.error);
        let value: Value = cb_codec::decode(&result.value.unwrap()).unwrap();
        assert_eq!(value, Value::Int(36));
    }

    #[tokio::test]
    async fn unknown_function_fails_without_panicking() {
        let evaluator = RegistryEvaluator::new(FunctionRegistry::with_builtins());
        let call = Value::List(vec![Value::Str("does-not-exist".into())]);
        let envelope = envelope_for(call, Value::Map(BTreeMap::new()));

        let result = evaluator.evaluate(&envelope).await;
        assert!(result.error);
        assert!(result.message.unwrap().contains("no function registered"));
    }
}
