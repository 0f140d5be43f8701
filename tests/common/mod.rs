//! Shared fixtures for integration tests.
#![allow(dead_code)]

use arxiv_ingest::sink::{QueueChannel, QueueConnector, SinkError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// In-memory stand-in for a message broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    connects: usize,
    messages: Vec<String>,
}

impl MemoryBroker {
    pub fn messages(&self) -> Vec<String> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().unwrap().connects
    }
}

struct MemoryChannel {
    inner: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl QueueConnector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn QueueChannel>, SinkError> {
        self.inner.lock().unwrap().connects += 1;
        Ok(Box::new(MemoryChannel {
            inner: self.inner.clone(),
        }))
    }
}

#[async_trait]
impl QueueChannel for MemoryChannel {
    async fn publish(&mut self, message: &str) -> Result<(), SinkError> {
        self.inner.lock().unwrap().messages.push(message.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Atom document with one `<entry>` per id; `None` leaves the id out.
pub fn atom_feed(ids: &[Option<&str>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <id>http://arxiv.org/api/test-feed</id>
  <title>ArXiv Query</title>
"#,
    );
    for (i, id) in ids.iter().enumerate() {
        xml.push_str("  <entry>\n");
        if let Some(id) = id {
            xml.push_str(&format!("    <id>{id}</id>\n"));
        }
        xml.push_str(&format!(
            "    <title>Paper {i}</title>\n    <updated>2024-01-0{d}T00:00:00Z</updated>\n    <author><name>Author {i}</name></author>\n    <arxiv:primary_category term=\"cs.AI\"/>\n  </entry>\n",
            d = i + 1
        ));
    }
    xml.push_str("</feed>\n");
    xml
}
