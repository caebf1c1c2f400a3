//! Server configuration (§6 "Configuration").
//!
//! A plain struct built through [`ConfigBuilder`], holding the
//! authorization/naming/completion callbacks as boxed trait objects so hosts
//! can plug in their own policy without a generic parameter on every
//! handler.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `authorize(repo_name, mode, cancel) -> bool`.
pub type AuthorizeFn = Arc<dyn Fn(String, AccessMode, CancellationToken) -> BoxFuture<'static, bool> + Send + Sync>;

/// `repository_name_normaliser(name) -> name`.
pub type NormaliserFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// `repository_name_validator(name) -> bool`.
pub type ValidatorFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// `on_receive_pack_completed(repo_name, updated_refs)`, fire-and-forget.
pub type CompletionHookFn = Arc<dyn Fn(String, Vec<String>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Server-wide configuration (§6). Construct via [`ConfigBuilder`].
#[derive(Clone)]
pub struct Config {
    pub repository_root: PathBuf,
    pub upload_pack_enabled: bool,
    pub receive_pack_enabled: bool,
    pub agent: String,
    pub authorize: AuthorizeFn,
    pub repository_name_normaliser: NormaliserFn,
    pub repository_name_validator: ValidatorFn,
    pub on_receive_pack_completed: Option<CompletionHookFn>,
}

impl Config {
    pub fn builder(repository_root: impl Into<PathBuf>) -> ConfigBuilder {
        ConfigBuilder::new(repository_root)
    }
}

pub struct ConfigBuilder {
    repository_root: PathBuf,
    upload_pack_enabled: bool,
    receive_pack_enabled: bool,
    agent: String,
    authorize: AuthorizeFn,
    repository_name_normaliser: NormaliserFn,
    repository_name_validator: ValidatorFn,
    on_receive_pack_completed: Option<CompletionHookFn>,
}

fn allow_all() -> AuthorizeFn {
    Arc::new(|_repo, _mode, _cancel| Box::pin(async { true }))
}

impl ConfigBuilder {
    pub fn new(repository_root: impl Into<PathBuf>) -> Self {
        Self {
            repository_root: repository_root.into(),
            upload_pack_enabled: true,
            receive_pack_enabled: true,
            agent: format!("git-smart-http/{}", env!("CARGO_PKG_VERSION")),
            authorize: allow_all(),
            repository_name_normaliser: Arc::new(crate::repo_name::default_normalise),
            repository_name_validator: Arc::new(crate::repo_name::default_validate),
            on_receive_pack_completed: None,
        }
    }

    pub fn upload_pack_enabled(mut self, enabled: bool) -> Self {
        self.upload_pack_enabled = enabled;
        self
    }

    pub fn receive_pack_enabled(mut self, enabled: bool) -> Self {
        self.receive_pack_enabled = enabled;
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn authorize(mut self, f: AuthorizeFn) -> Self {
        self.authorize = f;
        self
    }

    pub fn repository_name_normaliser(mut self, f: NormaliserFn) -> Self {
        self.repository_name_normaliser = f;
        self
    }

    pub fn repository_name_validator(mut self, f: ValidatorFn) -> Self {
        self.repository_name_validator = f;
        self
    }

    pub fn on_receive_pack_completed(mut self, f: CompletionHookFn) -> Self {
        self.on_receive_pack_completed = Some(f);
        self
    }

    pub fn build(self) -> Config {
        Config {
            repository_root: self.repository_root,
            upload_pack_enabled: self.upload_pack_enabled,
            receive_pack_enabled: self.receive_pack_enabled,
            agent: self.agent,
            authorize: self.authorize,
            repository_name_normaliser: self.repository_name_normaliser,
            repository_name_validator: self.repository_name_validator,
            on_receive_pack_completed: self.on_receive_pack_completed,
        }
    }
}

/// Fire the post-push completion hook without letting its outcome affect the
/// caller (§4.E "Hook invocation must be fire-and-forget").
pub fn notify_receive_pack_completed(config: &Config, repo_name: String, updated_ref_names: Vec<String>) {
    let Some(hook) = config.on_receive_pack_completed.clone() else { return };
    tokio::spawn(async move {
        hook(repo_name, updated_ref_names).await;
    });
}
