//! Model and action registries, and the scoped application view.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::app::Application;
use crate::error::{ActionError, BoxError};

/// Name → model handle registry, ordered by name.
#[derive(Debug, Clone)]
pub struct Models<M> {
    entries: BTreeMap<String, M>,
}

impl<M> Default for Models<M> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<M> Models<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, model: M) -> Option<M> {
        self.entries.insert(name.into(), model)
    }

    pub fn get(&self, name: &str) -> Option<&M> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &M)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<M> FromIterator<(String, M)> for Models<M> {
    fn from_iter<I: IntoIterator<Item = (String, M)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

type Handler<A> = Arc<
    dyn Fn(Arc<AppContext<A>>, Value) -> BoxFuture<'static, Result<Value, BoxError>>
        + Send
        + Sync,
>;

/// An injectable action: an async handler that runs against an [`AppContext`].
pub struct Action<A: Application> {
    name: String,
    handler: Handler<A>,
}

impl<A: Application> Action<A> {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<AppContext<A>>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |ctx, input| handler(ctx, input).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rebinds this action to `context`.
    pub fn inject(&self, context: Weak<AppContext<A>>) -> InjectedAction<A> {
        InjectedAction {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
            context,
        }
    }
}

impl<A: Application> Clone for Action<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<A: Application> fmt::Debug for Action<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}

/// Name → action registry held by the shared application.
pub struct Actions<A: Application> {
    entries: BTreeMap<String, Action<A>>,
}

impl<A: Application> Default for Actions<A> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<A: Application> Actions<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `action` under its own name, replacing any previous one.
    pub fn register(&mut self, action: Action<A>) -> Option<Action<A>> {
        self.entries.insert(action.name.clone(), action)
    }

    pub fn get(&self, name: &str) -> Option<&Action<A>> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Action<A>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<A: Application> Clone for Actions<A> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<A: Application> fmt::Debug for Actions<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// An action bound to one [`AppContext`].
///
/// Holds the context weakly; the context owns its injected actions.
pub struct InjectedAction<A: Application> {
    name: String,
    handler: Handler<A>,
    context: Weak<AppContext<A>>,
}

impl<A: Application> InjectedAction<A> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, input: Value) -> Result<Value, ActionError> {
        let context = self
            .context
            .upgrade()
            .ok_or_else(|| ActionError::ContextReleased(self.name.clone()))?;

        (self.handler)(context, input)
            .await
            .map_err(|source| ActionError::Failed {
                action: self.name.clone(),
                source,
            })
    }
}

impl<A: Application> fmt::Debug for InjectedAction<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedAction")
            .field("name", &self.name)
            .field("bound", &(self.context.strong_count() > 0))
            .finish()
    }
}

/// View of the application handed to a test.
///
/// Same application as the shared one, except that the models are the
/// given handles and every action is injected with this view.
pub struct AppContext<A: Application> {
    app: Arc<A>,
    models: Models<A::Model>,
    actions: BTreeMap<String, InjectedAction<A>>,
}

impl<A: Application> AppContext<A> {
    /// Builds a view of `app` over `models`, injecting every registered
    /// action with the new view.
    pub fn bind(app: Arc<A>, models: Models<A::Model>) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let actions = app
                .actions()
                .iter()
                .map(|(name, action)| (name.to_string(), action.inject(weak.clone())))
                .collect();
            Self {
                app,
                models,
                actions,
            }
        })
    }

    /// The shared application, for every field the view does not replace.
    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn models(&self) -> &Models<A::Model> {
        &self.models
    }

    pub fn model(&self, name: &str) -> Option<&A::Model> {
        self.models.get(name)
    }

    pub fn actions(&self) -> impl Iterator<Item = (&str, &InjectedAction<A>)> {
        self.actions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn action(&self, name: &str) -> Option<&InjectedAction<A>> {
        self.actions.get(name)
    }

    /// Runs the named action against this view.
    pub async fn call(&self, name: &str, input: Value) -> Result<Value, ActionError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| ActionError::NotFound(name.to_string()))?;
        action.call(input).await
    }
}

impl<A: Application> fmt::Debug for AppContext<A>
where
    A::Model: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("models", &self.models)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}
