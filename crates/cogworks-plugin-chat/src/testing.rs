use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cogworks_core::{CogError, QueryRequest, Result};

use crate::image::{ImageProvider, ImageRequest};
use crate::query::CompletionProvider;

/// Replays scripted outcomes, then keeps failing.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<String>>>,
    seen: Mutex<Vec<QueryRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &QueryRequest) -> Result<String> {
        self.seen.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CogError::Transport("script exhausted".into())))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["model-a".into(), "model-b".into()])
    }
}

pub struct FixedImage(pub Vec<u8>);

#[async_trait]
impl ImageProvider for FixedImage {
    async fn generate(&self, _request: &ImageRequest) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}
