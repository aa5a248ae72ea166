use crate::errors::RepairError;
use crate::repair::{RepairCapability, RepairRequest};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum RepairReply {
    Code(String),
    Error(String),
}

impl RepairReply {
    pub fn code(code: &str) -> Self {
        RepairReply::Code(code.to_string())
    }
}

/// Replies with queued answers per path. The last queued reply for a path
/// repeats; paths with nothing queued get their own code back unchanged.
pub struct ScriptedRepair {
    replies: Mutex<HashMap<String, VecDeque<RepairReply>>>,
    requests: Mutex<Vec<RepairRequest>>,
}

impl ScriptedRepair {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, path: &str, reply: RepairReply) {
        self.replies
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<RepairRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: &RepairRequest) -> RepairReply {
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(&request.path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| RepairReply::Code(request.code.clone())),
            None => RepairReply::Code(request.code.clone()),
        }
    }
}

#[async_trait]
impl RepairCapability for ScriptedRepair {
    async fn repair(&self, request: &RepairRequest) -> Result<String, RepairError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.next_reply(request) {
            RepairReply::Code(code) => Ok(code),
            RepairReply::Error(message) => Err(RepairError::Failed(message)),
        }
    }
}
