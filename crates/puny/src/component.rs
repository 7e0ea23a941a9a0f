//! The component runtime.
//!
//! A [`Component`] owns one mounted node, its data store, its compile caches
//! and its render scheduler. Everything runs on one thread; listeners and
//! timer callbacks hold weak references so a dropped component simply stops
//! reacting.

use crate::error::{Error, MountError, ResolutionError};
use crate::expression::CompiledExpression;
use crate::render::{BoundAction, BoundArgument, BoundHandler, EventSink, Renderer};
use crate::scheduler::{DEFAULT_INTERVAL, Scheduler, Timer};
use crate::scope::{Resolver, ScopeChain};
use crate::store::{Store, Write};
use crate::template::{Action, CompileCache, Template};
use indexmap::IndexMap;
use puny_scene::{Document, Event, Listener, ListenerError, NodeId};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;
use ulid::Ulid;

pub type Method = Rc<dyn Fn(&Component, &[Value]) -> Result<(), Error>>;
pub type Computed = Rc<dyn Fn(&Store) -> Value>;
pub type RenderHook = Rc<dyn Fn(&Component) -> Result<(), Error>>;

const UNNAMED: &str = "unnamed";

/// Where a component mounts: a selector resolved against the document, or a
/// node the caller already holds.
#[derive(Debug, Clone, PartialEq)]
pub enum MountTarget {
    Selector(String),
    Node(NodeId),
}

impl From<&str> for MountTarget {
    fn from(selector: &str) -> Self {
        Self::Selector(selector.to_string())
    }
}

impl From<String> for MountTarget {
    fn from(selector: String) -> Self {
        Self::Selector(selector)
    }
}

impl From<NodeId> for MountTarget {
    fn from(node: NodeId) -> Self {
        Self::Node(node)
    }
}

impl MountTarget {
    /// Every render replaces the mounted node in its parent, so the body and
    /// nodes outside the body's tree cannot host a component.
    fn resolve(&self, document: &Document) -> Result<NodeId, MountError> {
        let node = match self {
            Self::Selector(selector) => document
                .query_selector(selector)
                .ok_or_else(|| MountError::Unresolved(selector.clone()))?,
            Self::Node(node) if document.contains(*node) => *node,
            Self::Node(node) => return Err(MountError::Stale(*node)),
        };
        if node != document.body() && document.is_attached(node) {
            Ok(node)
        } else {
            Err(MountError::Unparented(node))
        }
    }
}

pub struct ComponentBuilder {
    document: Document,
    mount: MountTarget,
    timer: Rc<dyn Timer>,
    name: Option<String>,
    template: Option<String>,
    data: Value,
    methods: IndexMap<String, Method>,
    computed: IndexMap<String, Computed>,
    on_rendered: Option<RenderHook>,
    interval: Duration,
}

impl ComponentBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Markup to render. Without one, the mount target's own markup is used.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        method: impl Fn(&Component, &[Value]) -> Result<(), Error> + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Rc::new(method));
        self
    }

    pub fn computed(mut self, name: impl Into<String>, computed: impl Fn(&Store) -> Value + 'static) -> Self {
        self.computed.insert(name.into(), Rc::new(computed));
        self
    }

    /// Runs after every render, the first one included.
    pub fn on_rendered(mut self, hook: impl Fn(&Component) -> Result<(), Error> + 'static) -> Self {
        self.on_rendered = Some(Rc::new(hook));
        self
    }

    /// Debounce interval between a data change and the render it causes.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Resolves the mount target, compiles the template, validates event
    /// actions against data and methods, and renders once.
    pub fn build(self) -> Result<Component, Error> {
        let name = self.name.unwrap_or_else(|| UNNAMED.to_string());
        let mount = self.mount.resolve(&self.document)?;
        let store = Store::from_value(self.data)?;

        let mut cache = CompileCache::new();
        let source = match self.template {
            Some(template) => template,
            None => self.document.outer_html(mount),
        };
        let template = Template::compile(&source, &mut cache)?;

        for action in template.actions() {
            match action {
                Action::Assign { target, .. } if !store.contains(target) => {
                    return Err(ResolutionError::field(target).into());
                }
                Action::Invoke { method, .. } if !self.methods.contains_key(method) => {
                    return Err(ResolutionError::method(method).into());
                }
                _ => {}
            }
        }

        let id = Ulid::new();
        log::debug!("[{name}] mounting component {id} at {mount}");
        let component = Component {
            inner: Rc::new(ComponentInner {
                id,
                name,
                document: self.document,
                template,
                methods: self.methods,
                computed: self.computed,
                on_rendered: self.on_rendered,
                scheduler: Scheduler::new(self.timer, self.interval),
                state: RefCell::new(State {
                    store,
                    cache,
                    root: mount,
                    last_error: None,
                    render_count: 0,
                }),
            }),
        };
        component.render_now()?;
        Ok(component)
    }
}

struct State {
    store: Store,
    cache: CompileCache,
    root: NodeId,
    last_error: Option<Error>,
    render_count: u64,
}

struct ComponentInner {
    id: Ulid,
    name: String,
    document: Document,
    template: Template,
    methods: IndexMap<String, Method>,
    computed: IndexMap<String, Computed>,
    on_rendered: Option<RenderHook>,
    scheduler: Scheduler,
    state: RefCell<State>,
}

/// Data first, then computed fields.
struct DataResolver<'a> {
    store: &'a Store,
    computed: &'a IndexMap<String, Computed>,
}

impl Resolver for DataResolver<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.store
            .resolve(name)
            .or_else(|| self.computed.get(name).map(|computed| computed(self.store)))
    }
}

/// Builds listeners that run bound actions against the component.
struct ListenerSink {
    component: Weak<ComponentInner>,
}

impl EventSink for ListenerSink {
    fn listener(&self, handler: BoundHandler) -> Listener {
        let component = self.component.clone();
        Rc::new(move |event: &Event| -> Result<(), ListenerError> {
            let Some(inner) = component.upgrade() else {
                return Ok(());
            };
            Component { inner }.dispatch(&handler, event)?;
            Ok(())
        })
    }
}

/// Handle to a mounted component. Clones share the same instance.
#[derive(Clone)]
pub struct Component {
    inner: Rc<ComponentInner>,
}

impl Component {
    pub fn builder(document: &Document, mount: impl Into<MountTarget>, timer: Rc<dyn Timer>) -> ComponentBuilder {
        ComponentBuilder {
            document: document.clone(),
            mount: mount.into(),
            timer,
            name: None,
            template: None,
            data: Value::Null,
            methods: IndexMap::new(),
            computed: IndexMap::new(),
            on_rendered: None,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Unique id, logged when the component mounts.
    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    /// Name given to the builder, `unnamed` otherwise.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    /// The currently mounted node.
    pub fn root(&self) -> NodeId {
        self.inner.state.borrow().root
    }

    /// Current value of a data field. Reads are not intercepted.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.state.borrow().store.get(field).cloned()
    }

    /// All data fields as one object.
    pub fn data(&self) -> Value {
        self.inner.state.borrow().store.to_value()
    }

    pub fn computed(&self, name: &str) -> Option<Value> {
        let computed = self.inner.computed.get(name)?;
        Some(computed(&self.inner.state.borrow().store))
    }

    /// Writes a data field. The store changes immediately; a changed public
    /// field schedules a render. Returns whether the value changed.
    pub fn set(&self, field: &str, value: Value) -> Result<bool, Error> {
        let write = {
            let mut state = self.inner.state.borrow_mut();
            let old = state.store.get(field).cloned();
            let write = state.store.set(field, value);
            if let (Some(Write::Changed { reactive: true }), Some(old)) = (write, old) {
                log::debug!(
                    "[{}] set {field} from {old} to {}",
                    self.inner.name,
                    state.store.get(field).unwrap_or(&Value::Null)
                );
            }
            write
        };
        match write {
            None => Err(ResolutionError::field(field).into()),
            Some(Write::Unchanged) => Ok(false),
            Some(Write::Changed { reactive }) => {
                if reactive {
                    self.schedule_render();
                }
                Ok(true)
            }
        }
    }

    /// Evaluates an expression against the component's data, through the
    /// same compile cache the template uses.
    pub fn evaluate(&self, expression: &str) -> Result<Value, Error> {
        let compiled = self.inner.state.borrow_mut().cache.expression(expression)?;
        self.eval_in(&compiled, &ScopeChain::new())
    }

    /// Whether a debounced render is armed and has not run yet.
    pub fn is_render_pending(&self) -> bool {
        self.inner.scheduler.is_pending()
    }

    /// Asks the render hook for one deferred action; see [`Store::request_follow_up`].
    pub fn request_follow_up(&self) {
        self.inner.state.borrow_mut().store.request_follow_up();
    }

    pub fn take_follow_up(&self) -> bool {
        self.inner.state.borrow_mut().store.take_follow_up()
    }

    /// Error of the last render started by the scheduler, if it failed.
    pub fn take_error(&self) -> Option<Error> {
        self.inner.state.borrow_mut().last_error.take()
    }

    /// Completed renders, the first one included.
    pub fn render_count(&self) -> u64 {
        self.inner.state.borrow().render_count
    }

    /// Renders immediately and swaps the result in for the mounted node,
    /// then runs the render hook.
    pub fn render_now(&self) -> Result<(), Error> {
        let inner = &self.inner;
        log::debug!("[{}] rendering...", inner.name);
        let root = {
            let state = inner.state.borrow();
            let resolver = DataResolver {
                store: &state.store,
                computed: &inner.computed,
            };
            let sink = ListenerSink {
                component: Rc::downgrade(inner),
            };
            Renderer::new(&inner.document, &resolver, &sink).render(&inner.template)?
        };

        let old = self.root();
        if let Err(error) = inner.document.replace_node(old, root) {
            if let Err(cleanup) = inner.document.remove_node(root) {
                log::trace!("[{}] dropping unmounted render: {cleanup}", inner.name);
            }
            return Err(error.into());
        }
        {
            let mut state = inner.state.borrow_mut();
            state.root = root;
            state.render_count += 1;
        }

        if let Some(hook) = inner.on_rendered.clone() {
            hook(self)?;
        }
        Ok(())
    }

    fn schedule_render(&self) {
        let component = Rc::downgrade(&self.inner);
        let armed = self.inner.scheduler.request(move || {
            let Some(inner) = component.upgrade() else {
                return;
            };
            let component = Component { inner };
            if let Err(error) = component.render_now() {
                log::error!("[{}] render failed: {error}", component.name());
                component.inner.state.borrow_mut().last_error = Some(error);
            }
        });
        if armed {
            log::trace!(
                "[{}] render scheduled in {:?}",
                self.inner.name,
                self.inner.scheduler.interval()
            );
        }
    }

    fn eval_in(&self, expression: &CompiledExpression, chain: &ScopeChain) -> Result<Value, Error> {
        let state = self.inner.state.borrow();
        let resolver = DataResolver {
            store: &state.store,
            computed: &self.inner.computed,
        };
        Ok(expression.eval(chain, &resolver)?)
    }

    /// Runs a bound action list for one event, in order.
    fn dispatch(&self, handler: &BoundHandler, event: &Event) -> Result<(), Error> {
        log::trace!("[{}] {} on {:?}", self.inner.name, handler.event, event.target);
        for action in &handler.actions {
            match action {
                BoundAction::Assign { target, value } => {
                    // Loop variables are gone by now; only data is in scope.
                    let value = self.eval_in(value, &ScopeChain::new())?;
                    self.set(target, value)?;
                }
                BoundAction::Invoke { method, arguments } => {
                    let callable = self
                        .inner
                        .methods
                        .get(method)
                        .cloned()
                        .ok_or_else(|| ResolutionError::method(method))?;
                    let arguments: Vec<Value> = arguments
                        .iter()
                        .map(|argument| match argument {
                            BoundArgument::Event => event.to_value(),
                            BoundArgument::Value(value) => value.clone(),
                        })
                        .collect();
                    callable(self, &arguments)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("root", &self.root())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::VirtualClock;
    use serde_json::json;

    fn mount(document_markup: &str) -> (Document, Rc<VirtualClock>) {
        (Document::parse(document_markup).unwrap(), Rc::new(VirtualClock::new()))
    }

    #[test]
    fn first_render_replaces_the_mount_node() {
        let (document, clock) = mount(r#"<main><div id="app"></div></main>"#);
        let component = Component::builder(&document, "#app", clock)
            .template(r#"<p id="app">{{ word }}</p>"#)
            .data(json!({"word": "pen"}))
            .build()
            .unwrap();
        assert_eq!(document.inner_html(document.body()), r#"<main><p id="app">pen</p></main>"#);
        assert_eq!(component.render_count(), 1);
        assert_eq!(component.name(), "unnamed");
    }

    #[test]
    fn missing_template_uses_the_mount_markup() {
        let (document, clock) = mount(r#"<div id="app"><b v-for="n in nums">{{ n }}</b></div>"#);
        Component::builder(&document, "#app", clock)
            .data(json!({"nums": [1, 2]}))
            .build()
            .unwrap();
        assert_eq!(
            document.inner_html(document.body()),
            r#"<div id="app"><b>1</b><b>2</b></div>"#
        );
    }

    #[test]
    fn computed_fields_follow_data() {
        let (document, clock) = mount(r#"<div id="app"></div>"#);
        let component = Component::builder(&document, "#app", clock.clone())
            .template(r#"<p>{{ total }}</p>"#)
            .data(json!({"items": [1, 2, 3]}))
            .computed("total", |store| {
                let items = store.get("items").and_then(Value::as_array).map_or(0, Vec::len);
                json!(items)
            })
            .build()
            .unwrap();
        assert_eq!(document.text_content(component.root()), "3");

        component.set("items", json!([1])).unwrap();
        assert_eq!(component.computed("total"), Some(json!(1)));
        clock.run_until_idle();
        assert_eq!(document.text_content(component.root()), "1");
    }

    #[test]
    fn evaluate_uses_data_and_computed() {
        let (document, clock) = mount(r#"<div id="app"></div>"#);
        let component = Component::builder(&document, "#app", clock)
            .template("<p></p>")
            .data(json!({"a": 2, "_secret": "s"}))
            .computed("double", |store| {
                let a = store.get("a").and_then(Value::as_i64).unwrap_or_default();
                json!(a * 2)
            })
            .build()
            .unwrap();
        assert_eq!(component.evaluate("a + double").unwrap(), json!(6));
        assert_eq!(component.evaluate("_secret").unwrap(), json!("s"));
        assert!(matches!(component.evaluate("nothing"), Err(Error::Resolution(_))));
        assert!(matches!(component.evaluate("a +"), Err(Error::Compile(_))));
    }

    #[test]
    fn mount_target_must_exist() {
        let (document, clock) = mount("<div></div>");
        let error = Component::builder(&document, "#missing", clock.clone())
            .template("<p></p>")
            .build()
            .unwrap_err();
        assert_eq!(error, Error::Mount(MountError::Unresolved("#missing".to_string())));

        let node = document.create_element("p");
        document.remove_node(node).unwrap();
        let error = Component::builder(&document, node, clock)
            .template("<p></p>")
            .build()
            .unwrap_err();
        assert_eq!(error, Error::Mount(MountError::Stale(node)));
    }

    #[test]
    fn mount_target_needs_a_parent_in_the_document() {
        let (document, clock) = mount(r#"<div id="app"></div>"#);
        let body = document.body();
        let error = Component::builder(&document, "body", clock.clone())
            .template("<p>x</p>")
            .build()
            .unwrap_err();
        assert_eq!(error, Error::Mount(MountError::Unparented(body)));
        assert!(document.contains(body));
        assert_eq!(document.inner_html(body), r#"<div id="app"></div>"#);

        let loose = document.create_element("section");
        let error = Component::builder(&document, loose, clock)
            .template("<p>x</p>")
            .build()
            .unwrap_err();
        assert_eq!(error, Error::Mount(MountError::Unparented(loose)));
    }

    #[test]
    fn actions_are_validated_at_build() {
        let (document, clock) = mount(r#"<div id="app"></div>"#);
        let error = Component::builder(&document, "#app", clock.clone())
            .template(r#"<p @click="missing()"></p>"#)
            .build()
            .unwrap_err();
        assert_eq!(error, Error::Resolution(ResolutionError::method("missing")));

        let error = Component::builder(&document, "#app", clock)
            .template(r#"<p @click="nope = 1"></p>"#)
            .data(json!({"yes": 0}))
            .build()
            .unwrap_err();
        assert_eq!(error, Error::Resolution(ResolutionError::field("nope")));
    }

    #[test]
    fn private_writes_do_not_schedule() {
        let (document, clock) = mount(r#"<div id="app"></div>"#);
        let component = Component::builder(&document, "#app", clock.clone())
            .template("<p>{{ _note }}</p>")
            .data(json!({"_note": "a"}))
            .build()
            .unwrap();
        assert_eq!(component.set("_note", json!("b")), Ok(true));
        assert!(!component.is_render_pending());
        assert!(!clock.has_pending_timers());
        assert_eq!(component.get("_note"), Some(json!("b")));
        assert_eq!(document.text_content(component.root()), "a");
    }

    #[test]
    fn writes_to_unknown_fields_fail() {
        let (document, clock) = mount(r#"<div id="app"></div>"#);
        let component = Component::builder(&document, "#app", clock)
            .template("<p></p>")
            .build()
            .unwrap();
        assert_eq!(
            component.set("ghost", json!(1)),
            Err(Error::Resolution(ResolutionError::field("ghost")))
        );
    }

    #[test]
    fn scheduled_render_failures_are_kept() {
        let (document, clock) = mount(r#"<div id="app"></div>"#);
        let component = Component::builder(&document, "#app", clock.clone())
            .template(r#"<ul><li v-for="x in xs">{{ x }}</li></ul>"#)
            .data(json!({"xs": [1]}))
            .build()
            .unwrap();
        let root = component.root();

        component.set("xs", json!(5)).unwrap();
        clock.run_until_idle();
        assert!(matches!(component.take_error(), Some(Error::Structural(_))));
        assert_eq!(component.take_error(), None);
        assert_eq!(component.root(), root);
        assert!(document.is_attached(root));
    }
}
