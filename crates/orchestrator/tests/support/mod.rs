//! Scripted execution primitive shared by the integration tests.
//!
//! The payload is a tiny command language:
//! `ok:<text>`, `sleep:<ms>`, `fail:<Name>:<message>`, `panic`, and `recover`
//! (fails with a reference error unless recovery hints were injected).

#![allow(dead_code)]

use async_trait::async_trait;
use orchestrator::{
    Context, EngineConfig, ExecutionManager, ExecutionPrimitive, PrimitiveOutput,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct ScriptedPrimitive {
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedPrimitive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of overlapping invocations seen.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionPrimitive for ScriptedPrimitive {
    async fn execute(&self, code: &str, context: &Context, _timeout: Duration) -> PrimitiveOutput {
        self.calls.lock().push(code.to_string());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let mut parts = code.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("ok"), Some(text), _) => PrimitiveOutput::value(text),
            (Some("sleep"), Some(ms), _) => {
                let ms: u64 = ms.trim().parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                PrimitiveOutput::value(json!({ "slept_ms": ms }))
            }
            (Some("fail"), Some(name), message) => {
                PrimitiveOutput::error(name, message.unwrap_or("failed"))
            }
            (Some("panic"), _, _) => panic!("primitive exploded"),
            (Some("recover"), _, _) if context.contains_key("recovery") => {
                PrimitiveOutput::value("recovered")
            }
            (Some("recover"), _, _) => {
                PrimitiveOutput::error("ReferenceError", "target is not defined")
            }
            _ => PrimitiveOutput::error("SyntaxError", format!("unknown command: {code}")),
        }
    }
}

pub fn manager(primitive: Arc<ScriptedPrimitive>) -> ExecutionManager {
    manager_with(primitive, EngineConfig::default())
}

pub fn manager_with(primitive: Arc<ScriptedPrimitive>, config: EngineConfig) -> ExecutionManager {
    ExecutionManager::builder(primitive)
        .config(config)
        .build()
        .expect("engine builds")
}
