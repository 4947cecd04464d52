//! Arena-backed state tree
//!
//! Nodes live in one vector owned by the pipeline and are addressed by index.
//! A node stores its parent as an index, never as an owning reference, and
//! the root is always index `0`. Removing a node unlinks it from its parent;
//! the node and its subtree stay in the arena so that existing handles keep
//! working, but they are no longer reachable from the root.
//!
//! Structural changes (attach, detach, counters) take the tree-wide write
//! lock. Registrations only take the read lock plus the node's own mutex.

use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::counter::{
    Counter, CounterSample, CounterSource, CounterType, NumericCounter, StringCounter,
    StringSource, SystemCounter,
};
use super::error::{MonitoringError, MonitoringResult};
use super::event::MonitoringEvent;
use super::pipeline::Core;
use super::severity::Severity;
use super::state::ComponentState;

pub(crate) type NodeId = usize;

const ROOT: NodeId = 0;

/// Repeat anchors kept per node before stale ones are pruned
const MAX_REPEAT_TITLES: usize = 1024;

/// Outcome of a registration call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The event was handed to the pipeline queue
    Enqueued,

    /// The severity is below the node's threshold
    BelowThreshold,

    /// An event with the same title was accepted within the repeat window
    Suppressed,

    /// The event queue was full and its overflow policy dropped the event
    Dropped,
}

impl Registration {
    pub fn is_enqueued(self) -> bool {
        self == Registration::Enqueued
    }
}

struct NodeState {
    threshold: Severity,
    repeat_window: Option<Duration>,
    /// First accepted registration per title inside the current window
    last_repeat: HashMap<String, Instant>,
    state: ComponentState,
}

struct NodeData {
    name: String,
    /// Dotted path from the module root, e.g. `billing.db.pool`
    component: String,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
    counters: Vec<Counter>,
    state: Mutex<NodeState>,
}

pub(crate) struct Tree {
    nodes: Vec<NodeData>,
}

impl Tree {
    pub(crate) fn new(module: &str, threshold: Severity) -> Self {
        Self {
            nodes: vec![NodeData::new(module.to_string(), module.to_string(), None, threshold)],
        }
    }

    fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id]
    }

    fn attach(
        &mut self,
        parent: NodeId,
        name: &str,
        threshold: Option<Severity>,
    ) -> MonitoringResult<NodeId> {
        let parent_node = self.node(parent);
        if parent_node.children.contains_key(name) {
            return Err(MonitoringError::ComponentExists(format!(
                "{}.{}",
                parent_node.component, name
            )));
        }

        let threshold = threshold.unwrap_or_else(|| parent_node.state.lock().threshold);
        let component = format!("{}.{}", parent_node.component, name);
        let id = self.nodes.len();

        debug!("attaching component '{}'", component);
        self.nodes
            .push(NodeData::new(name.to_string(), component, Some(parent), threshold));
        self.nodes[parent].children.insert(name.to_string(), id);
        Ok(id)
    }

    fn detach(&mut self, id: NodeId) -> MonitoringResult<()> {
        if id == ROOT {
            return Err(MonitoringError::RootRemoval(self.node(ROOT).name.clone()));
        }

        let Some(parent) = self.nodes[id].parent.take() else {
            return Ok(());
        };
        let name = self.nodes[id].name.clone();
        self.nodes[parent].children.remove(&name);
        debug!("removed component '{}' from monitoring", self.nodes[id].component);
        Ok(())
    }

    /// Whether the parent chain of `id` ends at the root
    fn is_attached(&self, mut id: NodeId) -> bool {
        while let Some(parent) = self.node(id).parent {
            id = parent;
        }
        id == ROOT
    }

    /// Depth-first walk over every node reachable from the root
    fn reachable(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.node(id).children.values().rev());
        }
        order
    }

    pub(crate) fn update_counters(&self) -> usize {
        let mut updated = 0;
        for id in self.reachable() {
            for counter in &self.node(id).counters {
                counter.update();
                updated += 1;
            }
        }
        trace!("updated {} counters", updated);
        updated
    }

    pub(crate) fn counter_samples(&self) -> Vec<CounterSample> {
        self.reachable()
            .into_iter()
            .flat_map(|id| {
                let node = self.node(id);
                node.counters.iter().map(|counter| CounterSample {
                    path: node.component.clone(),
                    name: counter.name().to_string(),
                    kind: counter.counter_type(),
                    value: counter.value(),
                })
            })
            .collect()
    }

    /// Mark the root as overflowing without registering an event
    pub(crate) fn mark_overflow(&self) {
        self.node(ROOT).state.lock().state = ComponentState::Overflow;
    }
}

impl NodeData {
    fn new(name: String, component: String, parent: Option<NodeId>, threshold: Severity) -> Self {
        Self {
            name,
            component,
            parent,
            children: BTreeMap::new(),
            counters: Vec::new(),
            state: Mutex::new(NodeState {
                threshold,
                repeat_window: None,
                last_repeat: HashMap::new(),
                state: ComponentState::default(),
            }),
        }
    }
}

/// Which repeat window applies to a registration
#[derive(Clone, Copy)]
enum Repeat {
    /// The node's window from `setup_states_repeat`, if any
    Node,
    Window(Duration),
}

/// Handle to one node of a module's state tree
///
/// Handles are cheap to clone and stay valid after the node is removed from
/// monitoring; a removed node can still register events and read its
/// counters, but it no longer shows up below the root.
#[derive(Clone)]
pub struct StateNode {
    core: Arc<Core>,
    id: NodeId,
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("component", &self.component())
            .field("state", &self.state())
            .finish()
    }
}

impl StateNode {
    pub(crate) fn root(core: Arc<Core>) -> Self {
        Self { core, id: ROOT }
    }

    fn tree(&self) -> &RwLock<Tree> {
        &self.core.tree
    }

    fn with_node<R>(&self, f: impl FnOnce(&NodeData) -> R) -> R {
        f(self.tree().read().node(self.id))
    }

    fn handle(&self, id: NodeId) -> StateNode {
        StateNode {
            core: self.core.clone(),
            id,
        }
    }

    pub fn name(&self) -> String {
        self.with_node(|node| node.name.clone())
    }

    /// Dotted component path written into events
    pub fn component(&self) -> String {
        self.with_node(|node| node.component.clone())
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT
    }

    /// Whether the node is still reachable from the root
    pub fn is_attached(&self) -> bool {
        self.tree().read().is_attached(self.id)
    }

    pub fn parent(&self) -> Option<StateNode> {
        self.with_node(|node| node.parent).map(|id| self.handle(id))
    }

    pub fn children(&self) -> Vec<StateNode> {
        let ids: Vec<NodeId> = self.with_node(|node| node.children.values().copied().collect());
        ids.into_iter().map(|id| self.handle(id)).collect()
    }

    pub fn child(&self, name: &str) -> Option<StateNode> {
        self.with_node(|node| node.children.get(name).copied())
            .map(|id| self.handle(id))
    }

    /// Create and link a child node
    ///
    /// Without an explicit threshold the child inherits this node's.
    pub fn attach_component(
        &self,
        name: &str,
        severity: Option<Severity>,
    ) -> MonitoringResult<StateNode> {
        let id = self.tree().write().attach(self.id, name, severity)?;
        Ok(self.handle(id))
    }

    /// Unlink this node (and with it its subtree) from its parent
    ///
    /// Fails for the root; a no-op for a node that is already removed.
    pub fn remove_from_monitoring(&self) -> MonitoringResult<()> {
        self.tree().write().detach(self.id)
    }

    pub fn severity(&self) -> Severity {
        self.with_node(|node| node.state.lock().threshold)
    }

    /// Change the minimum severity this node accepts
    pub fn set_severity(&self, threshold: Severity) {
        self.with_node(|node| node.state.lock().threshold = threshold);
    }

    /// Coalesce registrations with the same title inside `window`
    ///
    /// `None` turns suppression off.
    pub fn setup_states_repeat(&self, window: Option<Duration>) {
        self.with_node(|node| {
            let mut state = node.state.lock();
            state.repeat_window = window;
            state.last_repeat.clear();
        });
    }

    pub fn state(&self) -> ComponentState {
        self.with_node(|node| node.state.lock().state)
    }

    /// Set the current state and register the transition with the state's
    /// default severity
    pub fn change_state(
        &self,
        state: ComponentState,
        title: &str,
        description: &str,
    ) -> MonitoringResult<Registration> {
        self.change_state_with(state, state.default_severity(), title, description)
    }

    pub fn change_state_with(
        &self,
        state: ComponentState,
        severity: Severity,
        title: &str,
        description: &str,
    ) -> MonitoringResult<Registration> {
        let previous = self.with_node(|node| std::mem::replace(&mut node.state.lock().state, state));
        trace!("state {} -> {}", previous, state);
        self.submit(severity, title, Repeat::Node, || description.to_string())
    }

    pub fn register(
        &self,
        severity: Severity,
        title: &str,
        description: &str,
    ) -> MonitoringResult<Registration> {
        self.submit(severity, title, Repeat::Node, || description.to_string())
    }

    /// Register with a description that is only built if the event is accepted
    pub fn register_with(
        &self,
        severity: Severity,
        title: &str,
        describe: impl FnOnce() -> String,
    ) -> MonitoringResult<Registration> {
        self.submit(severity, title, Repeat::Node, describe)
    }

    /// Register an error, appending its `source()` chain to the description
    pub fn register_error(
        &self,
        severity: Severity,
        title: &str,
        description: &str,
        error: &(dyn StdError + 'static),
    ) -> MonitoringResult<Registration> {
        self.submit(severity, title, Repeat::Node, || {
            describe_error(description, error)
        })
    }

    /// Register with an explicit repeat window, regardless of the node's
    pub fn register_repeat(
        &self,
        window: Duration,
        severity: Severity,
        title: &str,
        description: &str,
    ) -> MonitoringResult<Registration> {
        self.submit(severity, title, Repeat::Window(window), || {
            description.to_string()
        })
    }

    pub fn register_repeat_with(
        &self,
        window: Duration,
        severity: Severity,
        title: &str,
        describe: impl FnOnce() -> String,
    ) -> MonitoringResult<Registration> {
        self.submit(severity, title, Repeat::Window(window), describe)
    }

    fn submit(
        &self,
        severity: Severity,
        title: &str,
        repeat: Repeat,
        describe: impl FnOnce() -> String,
    ) -> MonitoringResult<Registration> {
        let (component, anchor) = {
            let tree = self.tree().read();
            let node = tree.node(self.id);
            let mut state = node.state.lock();

            if !severity.reaches(state.threshold) {
                return Ok(Registration::BelowThreshold);
            }

            let window = match repeat {
                Repeat::Node => state.repeat_window,
                Repeat::Window(window) => Some(window),
            };
            let mut anchor = None;
            if let Some(window) = window {
                let now = Instant::now();
                if let Some(anchor) = state.last_repeat.get(title)
                    && now.duration_since(*anchor) < window
                {
                    trace!("suppressing repeated '{}' on {}", title, node.component);
                    return Ok(Registration::Suppressed);
                }
                if state.last_repeat.len() >= MAX_REPEAT_TITLES {
                    state
                        .last_repeat
                        .retain(|_, anchor| now.duration_since(*anchor) < window);
                }
                state.last_repeat.insert(title.to_string(), now);
                anchor = Some(now);
            }

            (node.component.clone(), anchor)
        };

        let event = MonitoringEvent::new(
            &self.core.machine,
            &self.core.module,
            component,
            severity,
            title,
            describe(),
        );
        match self.core.enqueue(event) {
            Ok(true) => Ok(Registration::Enqueued),
            Ok(false) => {
                self.release_anchor(title, anchor);
                Ok(Registration::Dropped)
            }
            Err(e) => {
                self.release_anchor(title, anchor);
                Err(e)
            }
        }
    }

    /// Forget a repeat anchor whose event never reached the queue
    fn release_anchor(&self, title: &str, anchor: Option<Instant>) {
        let Some(anchor) = anchor else {
            return;
        };
        self.with_node(|node| {
            let mut state = node.state.lock();
            if state.last_repeat.get(title) == Some(&anchor) {
                state.last_repeat.remove(title);
            }
        });
    }

    fn attach_counter(&self, counter: Counter) -> MonitoringResult<()> {
        let mut tree = self.tree().write();
        let node = &mut tree.nodes[self.id];
        if node.counters.iter().any(|c| c.name() == counter.name()) {
            return Err(MonitoringError::CounterExists(format!(
                "{}/{}",
                node.component,
                counter.name()
            )));
        }
        node.counters.push(counter);
        Ok(())
    }

    /// Attach a counter whose raw value is set through its mutators
    pub fn attach_numeric_counter(
        &self,
        name: &str,
        kind: CounterType,
    ) -> MonitoringResult<Arc<NumericCounter>> {
        self.attach_numeric_counter_from(name, kind, CounterSource::Manual)
    }

    pub fn attach_numeric_counter_from(
        &self,
        name: &str,
        kind: CounterType,
        source: CounterSource,
    ) -> MonitoringResult<Arc<NumericCounter>> {
        let counter = Arc::new(NumericCounter::new(name, kind, source)?);
        self.attach_counter(Counter::Numeric(counter.clone()))?;
        Ok(counter)
    }

    pub fn attach_string_counter(
        &self,
        name: &str,
        source: StringSource,
    ) -> MonitoringResult<Arc<StringCounter>> {
        let counter = Arc::new(StringCounter::new(name, source));
        self.attach_counter(Counter::Text(counter.clone()))?;
        Ok(counter)
    }

    /// Attach a read-only counter over an operating-system metric
    pub fn attach_system_counter(
        &self,
        name: &str,
        metric: SystemCounter,
    ) -> MonitoringResult<Arc<NumericCounter>> {
        self.attach_numeric_counter_from(
            name,
            metric.counter_type(),
            CounterSource::System(metric),
        )
    }

    pub fn counters(&self) -> Vec<Counter> {
        self.with_node(|node| node.counters.clone())
    }

    pub fn counter(&self, name: &str) -> Option<Counter> {
        self.with_node(|node| node.counters.iter().find(|c| c.name() == name).cloned())
    }
}

fn describe_error(description: &str, error: &(dyn StdError + 'static)) -> String {
    let mut text = String::from(description);
    if !text.is_empty() {
        text.push('\n');
    }
    let _ = write!(text, "{}", error);

    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(text, "\ncaused by: {}", cause);
        source = cause.source();
    }
    text
}
