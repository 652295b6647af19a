//! Component registry: name/label lookup of live device objects.
//!
//! The registry decouples configuration-time device construction from
//! call-time lookup. Plans, GUIs, and scan tooling refer to devices by stable
//! string name or label instead of holding direct references — essential when
//! the actual device set varies with the beamline configuration file.
//!
//! Queries are expressed with the tagged [`Query`] type and combine with *or*
//! semantics: `Query::any("I0")` matches a component whose name *or* label is
//! `"I0"`. A [`Query::Instance`] passes an already-constructed component
//! through unchanged, tolerating call sites that hand over an object where a
//! name was expected.
//!
//! The registry is explicit state, not a global singleton: loaders and tests
//! construct their own [`InstrumentRegistry`] and pass it where needed.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{BeamlineError, BeamlineResult};

/// A registered hardware-control object: detector channel, scaler,
/// pre-amplifier, motor, etc.
///
/// Components carry a name (should be unique within a registry; an empty name
/// simply never matches name queries) and a set of free-text labels used for
/// bulk lookup (`"ion_chambers"`, `"detectors"`). Devices with nested
/// hardware expose them through [`Component::children`] so sub-components are
/// independently findable.
pub trait Component: Send + Sync + 'static {
    /// The component's registry name.
    fn name(&self) -> &str;

    /// Labels used to group components for bulk lookup.
    fn labels(&self) -> &BTreeSet<String>;

    /// Declared sub-components, registered recursively.
    fn children(&self) -> Vec<Arc<dyn Component>> {
        Vec::new()
    }

    /// Upcast for typed retrieval via [`InstrumentRegistry::find_as`].
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A registry lookup criterion.
///
/// Criteria combine with *or* semantics; [`Query::one_of`] builds explicit
/// unions.
#[derive(Clone)]
pub enum Query {
    /// Match components by exact name.
    Name(String),
    /// Match components carrying a label.
    Label(String),
    /// Match by name or label (shorthand for both).
    Any(String),
    /// Yield this already-constructed component directly.
    Instance(Arc<dyn Component>),
    /// Union of sub-queries.
    OneOf(Vec<Query>),
}

impl Query {
    /// Query by component name.
    pub fn name(name: impl Into<String>) -> Self {
        Query::Name(name.into())
    }

    /// Query by label.
    pub fn label(label: impl Into<String>) -> Self {
        Query::Label(label.into())
    }

    /// Query by name or label.
    pub fn any(term: impl Into<String>) -> Self {
        Query::Any(term.into())
    }

    /// Pass an existing component through the lookup unchanged.
    pub fn instance(component: Arc<dyn Component>) -> Self {
        Query::Instance(component)
    }

    /// Union of several queries.
    pub fn one_of(queries: impl IntoIterator<Item = Query>) -> Self {
        Query::OneOf(queries.into_iter().collect())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Name(name) => write!(f, "name=\"{name}\""),
            Query::Label(label) => write!(f, "label=\"{label}\""),
            Query::Any(term) => write!(f, "any=\"{term}\""),
            Query::Instance(cpt) => write!(f, "instance=\"{}\"", cpt.name()),
            Query::OneOf(queries) => {
                let parts: Vec<String> = queries.iter().map(|q| q.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({self})")
    }
}

/// Identity comparison on trait-object components (data pointer only).
fn same_component(a: &Arc<dyn Component>, b: &Arc<dyn Component>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// A registry keeps track of devices, signals, etc. that have been previously
/// registered, so they can be retrieved later by name or label.
#[derive(Default)]
pub struct InstrumentRegistry {
    components: Vec<Arc<dyn Component>>,
}

impl InstrumentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all previously registered components.
    ///
    /// Used when reloading the instrument configuration from disk. References
    /// held elsewhere in the program are unaffected.
    pub fn clear(&mut self) {
        self.components.clear();
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Names of all registered components, in registration order.
    pub fn component_names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name().to_string()).collect()
    }

    /// Register a component so that it can be retrieved later.
    ///
    /// A previously registered component with the same non-empty name is
    /// evicted first, so re-registering under a name replaces the old entry.
    /// Declared sub-components are registered recursively so they are
    /// independently findable. Returns the same component that was passed in.
    pub fn register(&mut self, component: Arc<dyn Component>) -> Arc<dyn Component> {
        let name = component.name().to_string();
        if !name.is_empty() {
            let before = self.components.len();
            self.components.retain(|c| c.name() != name);
            if self.components.len() != before {
                log::debug!("Replacing registered component with duplicate name: '{name}'");
            }
        }
        log::debug!("Registering component '{name}' (labels: {:?})", component.labels());
        self.components.push(Arc::clone(&component));
        for child in component.children() {
            self.register(child);
        }
        component
    }

    /// Find exactly one component matching the query.
    ///
    /// # Errors
    ///
    /// [`BeamlineError::ComponentNotFound`] when nothing matches;
    /// [`BeamlineError::MultipleComponentsFound`] when more than one does —
    /// refine the query or use [`InstrumentRegistry::findall`].
    pub fn find(&self, query: &Query) -> BeamlineResult<Arc<dyn Component>> {
        let mut results = self.findall(query)?;
        if results.len() > 1 {
            return Err(BeamlineError::MultipleComponentsFound {
                query: query.to_string(),
                count: results.len(),
            });
        }
        results
            .pop()
            .ok_or_else(|| BeamlineError::ComponentNotFound(query.to_string()))
    }

    /// Find all components matching the query.
    ///
    /// Criteria combine with *or* semantics and the result is de-duplicated by
    /// identity: a component matching both the name and the label arm of a
    /// query appears once.
    ///
    /// # Errors
    ///
    /// [`BeamlineError::ComponentNotFound`] when the result set is empty;
    /// [`BeamlineError::InvalidComponentLabel`] when a label criterion cannot
    /// be evaluated (empty label string).
    pub fn findall(&self, query: &Query) -> BeamlineResult<Vec<Arc<dyn Component>>> {
        let mut results = Vec::new();
        self.collect_matches(query, &mut results)?;
        if results.is_empty() {
            return Err(BeamlineError::ComponentNotFound(query.to_string()));
        }
        Ok(results)
    }

    /// Find one component and downcast it to a concrete device type.
    pub fn find_as<T>(&self, query: &Query) -> BeamlineResult<Arc<T>>
    where
        T: Component + Send + Sync + 'static,
    {
        let component = self.find(query)?;
        let name = component.name().to_string();
        component.as_any().downcast::<T>().map_err(|_| {
            BeamlineError::Instrument(format!(
                "Component '{name}' is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    fn collect_matches(
        &self,
        query: &Query,
        out: &mut Vec<Arc<dyn Component>>,
    ) -> BeamlineResult<()> {
        match query {
            Query::Name(name) => {
                for cpt in &self.components {
                    if cpt.name() == name {
                        push_unique(out, Arc::clone(cpt));
                    }
                }
            }
            Query::Label(label) => {
                if label.is_empty() {
                    return Err(BeamlineError::InvalidComponentLabel(label.clone()));
                }
                for cpt in &self.components {
                    if cpt.labels().contains(label) {
                        push_unique(out, Arc::clone(cpt));
                    }
                }
            }
            Query::Any(term) => {
                self.collect_matches(&Query::Name(term.clone()), out)?;
                self.collect_matches(&Query::Label(term.clone()), out)?;
            }
            Query::Instance(cpt) => {
                push_unique(out, Arc::clone(cpt));
            }
            Query::OneOf(queries) => {
                for q in queries {
                    self.collect_matches(q, out)?;
                }
            }
        }
        Ok(())
    }
}

fn push_unique(out: &mut Vec<Arc<dyn Component>>, component: Arc<dyn Component>) {
    if !out.iter().any(|c| same_component(c, &component)) {
        out.push(component);
    }
}
