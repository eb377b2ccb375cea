//! In-memory [`Session`] for tests.
//!
//! Pages are trees of [`FakeNode`]s keyed by the exact selector string the
//! scraper asks for, so a test builds only what the code under test looks up.

use super::{PageElement, Session};
use crate::error::BrowserError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub children: HashMap<String, Vec<FakeNode>>,
    /// Name of the frame this node opens, if it is an iframe.
    pub frame: Option<String>,
}

impl FakeNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, selector: &str, node: FakeNode) -> Self {
        self.children
            .entry(selector.to_string())
            .or_default()
            .push(node);
        self
    }

    pub fn children(mut self, selector: &str, nodes: Vec<FakeNode>) -> Self {
        self.children
            .entry(selector.to_string())
            .or_default()
            .extend(nodes);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub top: FakeNode,
    pub frames: HashMap<String, FakeNode>,
}

impl FakePage {
    pub fn new(top: FakeNode) -> Self {
        Self {
            top,
            frames: HashMap::new(),
        }
    }

    /// Page whose content lives in the frame `name`.
    pub fn framed(name: &str, content: FakeNode) -> Self {
        let mut frame = FakeNode::new();
        frame.frame = Some(name.to_string());
        let top = FakeNode::new().child(&format!(r#"iframe[name="{name}"]"#), frame);
        let mut frames = HashMap::new();
        frames.insert(name.to_string(), content);
        Self { top, frames }
    }
}

/// What the fake saw, shared with the test after the session is consumed.
#[derive(Debug, Default)]
pub struct FakeLog {
    pub navigations: Vec<String>,
    pub typed: Vec<(String, String)>,
    pub clicks: Vec<String>,
    pub closed: bool,
}

#[derive(Default)]
pub struct FakeSession {
    pages: HashMap<String, FakePage>,
    failing: HashSet<String>,
    current: Option<String>,
    frame: Option<String>,
    log: Arc<Mutex<FakeLog>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, page: FakePage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    /// Navigation to `url` returns an error.
    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn log(&self) -> Arc<Mutex<FakeLog>> {
        self.log.clone()
    }

    fn scope(&self) -> Option<&FakeNode> {
        let page = self.pages.get(self.current.as_deref()?)?;
        match &self.frame {
            Some(name) => page.frames.get(name),
            None => Some(&page.top),
        }
    }

    fn wrap(&self, node: &FakeNode) -> FakeElement {
        FakeElement {
            node: node.clone(),
            log: self.log.clone(),
        }
    }
}

pub struct FakeElement {
    node: FakeNode,
    log: Arc<Mutex<FakeLog>>,
}

impl FakeElement {
    fn label(&self) -> String {
        self.node
            .attrs
            .get("id")
            .cloned()
            .unwrap_or_else(|| self.node.text.clone())
    }
}

#[async_trait]
impl PageElement for FakeElement {
    async fn text(&self) -> Result<String, BrowserError> {
        Ok(self.node.text.clone())
    }

    async fn attr(&self, name: &str) -> Result<Option<String>, BrowserError> {
        Ok(self.node.attrs.get(name).cloned())
    }

    async fn find(&self, selector: &str) -> Result<Option<Self>, BrowserError> {
        Ok(self
            .node
            .children
            .get(selector)
            .and_then(|nodes| nodes.first())
            .map(|node| FakeElement {
                node: node.clone(),
                log: self.log.clone(),
            }))
    }

    async fn send_keys(&self, text: &str) -> Result<(), BrowserError> {
        let label = self.label();
        self.log.lock().unwrap().typed.push((label, text.to_string()));
        Ok(())
    }

    async fn click(&self) -> Result<(), BrowserError> {
        let label = self.label();
        self.log.lock().unwrap().clicks.push(label);
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    type Element = FakeElement;

    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.log.lock().unwrap().navigations.push(url.to_string());
        if self.failing.contains(url) {
            return Err(BrowserError::Command(format!("net::ERR_CONNECTION_RESET at {url}")));
        }
        self.current = Some(url.to_string());
        self.frame = None;
        Ok(())
    }

    async fn find(&mut self, selector: &str) -> Result<Option<Self::Element>, BrowserError> {
        Ok(self
            .scope()
            .and_then(|node| node.children.get(selector))
            .and_then(|nodes| nodes.first())
            .map(|node| self.wrap(node)))
    }

    async fn find_all(&mut self, selector: &str) -> Result<Vec<Self::Element>, BrowserError> {
        Ok(self
            .scope()
            .and_then(|node| node.children.get(selector))
            .map(|nodes| nodes.iter().map(|node| self.wrap(node)).collect())
            .unwrap_or_default())
    }

    async fn switch_to_frame(&mut self, frame: Self::Element) -> Result<(), BrowserError> {
        match frame.node.frame {
            Some(name) => {
                self.frame = Some(name);
                Ok(())
            }
            None => Err(BrowserError::MissingFrame("<not a frame>".into())),
        }
    }

    async fn leave_frame(&mut self) -> Result<(), BrowserError> {
        self.frame = None;
        Ok(())
    }

    async fn close(self) -> Result<(), BrowserError> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}
