//! Shared test utilities.

#![allow(dead_code, unused_imports)]

use flowstate::config::RuntimeConfig;
use flowstate::navigation::{HostHistory, MemoryHistory, Route};
use flowstate::storage::{FileStore, KeyValueStore};
use flowstate::Runtime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Route table used across the integration tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Screen {
    Home,
    Payments,
    PaymentAmount { amount: u64 },
    PaymentConfirm { amount: u64 },
    TransactionDetail { id: String },
    Quiz { pool: String },
    Profile,
}

impl Route for Screen {
    fn key(&self) -> &'static str {
        match self {
            Screen::Home => "home",
            Screen::Payments => "payments",
            Screen::PaymentAmount { .. } => "payment-amount",
            Screen::PaymentConfirm { .. } => "payment-confirm",
            Screen::TransactionDetail { .. } => "transaction-detail",
            Screen::Quiz { .. } => "quiz",
            Screen::Profile => "profile",
        }
    }

    fn path(&self) -> String {
        match self {
            Screen::TransactionDetail { id } => format!("/transaction-detail/{}", id),
            other => format!("/{}", other.key()),
        }
    }
}

/// Entry route of each configured tab stack.
pub fn entry_route(stack_id: &str) -> Screen {
    match stack_id {
        "payment-stack" => Screen::Payments,
        "quiz-stack" => Screen::Quiz {
            pool: "daily".to_string(),
        },
        "profile-stack" => Screen::Profile,
        _ => Screen::Home,
    }
}

/// Create a file store in a fresh temporary directory.
pub fn temp_store() -> (TempDir, Arc<dyn KeyValueStore>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
    (temp_dir, Arc::new(store))
}

/// Write a config file into `dir` and return its path.
pub fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content).expect("Failed to write config");
    path
}

/// Runtime over `storage` with default config and no host history.
pub fn runtime(storage: Arc<dyn KeyValueStore>) -> Runtime<Screen> {
    Runtime::builder(RuntimeConfig::default(), entry_route)
        .storage(storage)
        .build()
        .expect("Failed to build runtime")
}

pub fn history() -> Arc<MemoryHistory> {
    Arc::new(MemoryHistory::new())
}

pub fn keys(frames: &[flowstate::navigation::RouteFrame<Screen>]) -> Vec<&'static str> {
    frames.iter().map(|f| f.key()).collect()
}
