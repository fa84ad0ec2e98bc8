//! QuickJS engine wrapper.
//!
//! One [`ScriptEngine`] owns one QuickJS runtime and a single context. It is
//! created right before a bundle's entry file runs and dropped when the
//! bundle is done; nothing is shared between engines.
//!
//! Guest code may `import()` sibling `.js` files once
//! [`ScriptEngine::enable_module_imports`] has been given the bundle root.
//! A promise rejection nobody handles fails the run like a thrown error.

use crate::error::ScriptError;
use rquickjs::convert::Coerced;
use rquickjs::loader::{Resolver, ScriptLoader};
use rquickjs::{CatchResultExt, Context, Ctx, Error, FromJs, Runtime, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Resource limits applied to each engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Wall-clock budget for the entry file plus its pending jobs.
    pub timeout: Option<Duration>,

    /// Heap limit in bytes.
    pub memory_limit: Option<usize>,

    /// Maximum native stack size in bytes.
    pub max_stack_size: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
            memory_limit: Some(64 * 1024 * 1024),
            max_stack_size: Some(1024 * 1024),
        }
    }
}

impl EngineOptions {
    /// No limits at all.
    pub fn unlimited() -> Self {
        Self {
            timeout: None,
            memory_limit: None,
            max_stack_size: None,
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0)
    }
}

#[derive(Clone, Default)]
struct Deadline(Arc<Mutex<Option<Instant>>>);

impl Deadline {
    fn arm(&self, budget: Option<Duration>) {
        if let Ok(mut deadline) = self.0.lock() {
            *deadline = budget.map(|b| Instant::now() + b);
        }
    }

    fn disarm(&self) {
        self.arm(None);
    }

    fn expired(&self) -> bool {
        self.0
            .lock()
            .map(|deadline| deadline.is_some_and(|d| Instant::now() >= d))
            .unwrap_or(false)
    }
}

/// Reasons of rejected promises that have no handler yet.
#[derive(Clone, Default)]
struct Rejections(Arc<Mutex<Vec<String>>>);

impl Rejections {
    fn track(&self, reason: String, is_handled: bool) {
        if let Ok(mut pending) = self.0.lock() {
            if is_handled {
                pending.pop();
            } else {
                pending.push(reason);
            }
        }
    }

    fn clear(&self) {
        if let Ok(mut pending) = self.0.lock() {
            pending.clear();
        }
    }

    fn first(&self) -> Option<String> {
        self.0.lock().ok().and_then(|pending| pending.first().cloned())
    }
}

fn describe_rejection(reason: Value<'_>) -> String {
    if let Some(exception) = reason.as_exception() {
        return exception.to_string();
    }
    let ctx = reason.ctx().clone();
    Coerced::<String>::from_js(&ctx, reason)
        .map(|text| text.0)
        .unwrap_or_else(|_| "unknown reason".to_string())
}

/// Resolves relative `.js` imports, refusing anything outside `root`.
struct BundleResolver {
    root: PathBuf,
}

impl Resolver for BundleResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        if !name.starts_with('.') {
            return Err(Error::new_resolving_message(
                base,
                name,
                "only relative imports are supported",
            ));
        }

        // The entry script is named by its file name only; modules carry
        // their full resolved path.
        let base_path = Path::new(base);
        let dir = match base_path.parent() {
            Some(parent) if base_path.is_absolute() => parent.to_path_buf(),
            _ => self.root.clone(),
        };

        let mut candidate = dir.join(name);
        if candidate.extension().is_none() {
            candidate.set_extension("js");
        }

        let resolved = candidate
            .canonicalize()
            .map_err(|_| Error::new_resolving(base, name))?;
        if !resolved.starts_with(&self.root) {
            return Err(Error::new_resolving_message(
                base,
                name,
                "module is outside the script directory",
            ));
        }

        Ok(resolved.to_string_lossy().into_owned())
    }
}

/// An isolated JavaScript engine instance.
pub struct ScriptEngine {
    name: String,
    context: Context,
    runtime: Runtime,
    options: EngineOptions,
    deadline: Deadline,
    interrupted: Arc<AtomicBool>,
    rejections: Rejections,
}

impl ScriptEngine {
    /// Create a runtime and a full context with the given limits.
    pub fn new(name: impl Into<String>, options: EngineOptions) -> Result<Self, ScriptError> {
        let name = name.into();
        let runtime = Runtime::new().map_err(|e| ScriptError::Engine(e.to_string()))?;

        if let Some(limit) = options.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = options.max_stack_size {
            runtime.set_max_stack_size(size);
        }

        let deadline = Deadline::default();
        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let deadline = deadline.clone();
            let interrupted = Arc::clone(&interrupted);
            runtime.set_interrupt_handler(Some(Box::new(move || {
                if deadline.expired() {
                    interrupted.store(true, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            })));
        }

        let rejections = Rejections::default();
        {
            let rejections = rejections.clone();
            runtime.set_host_promise_rejection_tracker(Some(Box::new(
                move |_ctx: Ctx<'_>, _promise: Value<'_>, reason: Value<'_>, is_handled: bool| {
                    let reason = if is_handled {
                        String::new()
                    } else {
                        describe_rejection(reason)
                    };
                    rejections.track(reason, is_handled);
                },
            )));
        }

        let context = Context::full(&runtime).map_err(|e| ScriptError::Engine(e.to_string()))?;
        debug!("Created engine {}", name);

        Ok(Self {
            name,
            context,
            runtime,
            options,
            deadline,
            interrupted,
            rejections,
        })
    }

    /// Let guest code `import()` `.js` files under `root`.
    pub fn enable_module_imports(&self, root: &Path) -> Result<(), ScriptError> {
        let root = root.canonicalize()?;
        debug!("Engine {} resolves imports under {:?}", self.name, root);
        self.runtime
            .set_loader(BundleResolver { root }, ScriptLoader::default());
        Ok(())
    }

    /// Engine name, normally the script id.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The engine's only context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Evaluate `source` as a global script, then drain the promise job
    /// queue. The execution budget covers both.
    pub fn execute(&self, source: &str) -> Result<(), ScriptError> {
        self.run(|ctx| ctx.eval::<(), _>(source))
    }

    /// Read and evaluate the script at `path`. Error locations carry the
    /// file name instead of `eval_script`.
    pub fn execute_file(&self, path: &Path) -> Result<(), ScriptError> {
        if !path.is_file() {
            return Err(ScriptError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("entry file {:?} not found", path),
            )));
        }
        self.run(|ctx| ctx.eval_file::<(), _>(path))
    }

    fn run<F>(&self, eval: F) -> Result<(), ScriptError>
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<()>,
    {
        self.interrupted.store(false, Ordering::SeqCst);
        self.rejections.clear();
        self.deadline.arm(self.options.timeout);

        let result = self
            .context
            .with(|ctx| eval(&ctx).catch(&ctx).map_err(|e| e.to_string()))
            .map_err(|message| self.execution_error(message))
            .and_then(|()| self.drain_jobs())
            .and_then(|()| match self.rejections.first() {
                Some(reason) => Err(ScriptError::Execution(format!(
                    "Unhandled promise rejection: {}",
                    reason
                ))),
                None => Ok(()),
            });

        self.deadline.disarm();
        result
    }

    /// Whether promise reactions are still queued.
    pub fn has_pending_jobs(&self) -> bool {
        self.runtime.is_job_pending()
    }

    fn drain_jobs(&self) -> Result<(), ScriptError> {
        let mut executed = 0usize;
        loop {
            if self.deadline.expired() {
                return Err(ScriptError::Timeout {
                    timeout_ms: self.options.timeout_ms(),
                });
            }

            match self.runtime.execute_pending_job() {
                Ok(true) => executed += 1,
                Ok(false) => break,
                Err(_) => {
                    let message = self.context.with(|ctx| {
                        Err::<(), _>(rquickjs::Error::Exception)
                            .catch(&ctx)
                            .err()
                            .map(|e| e.to_string())
                            .unwrap_or_default()
                    });
                    return Err(self.execution_error(message));
                }
            }
        }

        if executed > 0 {
            trace!("Engine {} drained {} pending job(s)", self.name, executed);
        }
        Ok(())
    }

    fn execution_error(&self, message: String) -> ScriptError {
        if self.interrupted.load(Ordering::SeqCst) {
            ScriptError::Timeout {
                timeout_ms: self.options.timeout_ms(),
            }
        } else {
            ScriptError::Execution(message)
        }
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        trace!("Tearing down engine {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ScriptEngine {
        ScriptEngine::new("test", EngineOptions::default()).unwrap()
    }

    #[test]
    fn test_execute_script() {
        let engine = engine();
        engine.execute("globalThis.answer = 6 * 7;").unwrap();

        let answer: i32 = engine
            .context()
            .with(|ctx| ctx.globals().get("answer"))
            .unwrap();
        assert_eq!(answer, 42);
    }

    #[test]
    fn test_syntax_error() {
        let result = engine().execute("function (");
        assert!(matches!(result, Err(ScriptError::Execution(_))));
    }

    #[test]
    fn test_thrown_error_message() {
        let result = engine().execute("throw new Error('boom');");
        match result {
            Err(ScriptError::Execution(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_timeout() {
        let options = EngineOptions {
            timeout: Some(Duration::from_millis(100)),
            ..EngineOptions::default()
        };
        let engine = ScriptEngine::new("spin", options).unwrap();

        let result = engine.execute("while (true) {}");
        assert!(matches!(result, Err(ScriptError::Timeout { timeout_ms: 100 })));
    }

    #[test]
    fn test_engine_usable_after_timeout() {
        let options = EngineOptions {
            timeout: Some(Duration::from_millis(50)),
            ..EngineOptions::default()
        };
        let engine = ScriptEngine::new("spin", options).unwrap();

        assert!(engine.execute("while (true) {}").is_err());
        assert!(engine.execute("1 + 1;").is_ok());
    }

    #[test]
    fn test_pending_jobs_drained() {
        let engine = engine();
        engine
            .execute("globalThis.done = false; Promise.resolve().then(() => { globalThis.done = true; });")
            .unwrap();

        assert!(!engine.has_pending_jobs());
        let done: bool = engine
            .context()
            .with(|ctx| ctx.globals().get("done"))
            .unwrap();
        assert!(done);
    }

    #[test]
    fn test_unhandled_rejection_fails_run() {
        let result = engine().execute("(async () => { throw new Error('late failure'); })();");
        match result {
            Err(ScriptError::Execution(message)) => {
                assert!(message.contains("Unhandled promise rejection"));
                assert!(message.contains("late failure"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_handled_rejection_is_not_an_error() {
        engine()
            .execute("Promise.reject(new Error('ignored')).catch(() => {});")
            .unwrap();
        engine()
            .execute("(async () => { try { await Promise.reject(1); } catch (e) {} })();")
            .unwrap();
    }

    #[test]
    fn test_sibling_module_import() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("util.js"), "export const factor = 7;").unwrap();
        let entry = temp.path().join("startup.js");
        std::fs::write(
            &entry,
            "import('./util.js').then((m) => { globalThis.product = m.factor * 6; });",
        )
        .unwrap();

        let engine = engine();
        engine.enable_module_imports(temp.path()).unwrap();
        engine.execute_file(&entry).unwrap();

        let product: i32 = engine
            .context()
            .with(|ctx| ctx.globals().get("product"))
            .unwrap();
        assert_eq!(product, 42);
    }

    #[test]
    fn test_import_outside_root_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("bundle");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(temp.path().join("secret.js"), "export const key = 'x';").unwrap();
        let entry = root.join("startup.js");
        std::fs::write(&entry, "import('../secret.js');").unwrap();

        let engine = engine();
        engine.enable_module_imports(&root).unwrap();
        let result = engine.execute_file(&entry);

        match result {
            Err(ScriptError::Execution(message)) => {
                assert!(message.contains("outside the script directory"), "{}", message)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_import_without_loader_fails() {
        let result = engine().execute("import('./util.js');");
        assert!(matches!(result, Err(ScriptError::Execution(_))));
    }

    #[test]
    fn test_execute_file_names_errors_after_entry() {
        let temp = tempfile::TempDir::new().unwrap();
        let entry = temp.path().join("startup.js");
        std::fs::write(&entry, "\nthrow new Error('boom');").unwrap();

        match engine().execute_file(&entry) {
            Err(ScriptError::Execution(message)) => {
                assert!(message.contains("startup.js:2"), "{}", message);
                assert!(!message.contains("eval_script"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_execute_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let result = engine().execute_file(&temp.path().join("startup.js"));
        assert!(matches!(result, Err(ScriptError::Io(_))));
    }

    #[test]
    fn test_memory_limit() {
        let options = EngineOptions {
            memory_limit: Some(4 * 1024 * 1024),
            ..EngineOptions::default()
        };
        let engine = ScriptEngine::new("hog", options).unwrap();

        let result = engine.execute("const a = []; while (true) { a.push(new Array(100000).fill(1)); }");
        assert!(result.is_err());
    }

    #[test]
    fn test_engines_do_not_share_globals() {
        let first = engine();
        let second = engine();

        first.execute("globalThis.secret = 1;").unwrap();
        second
            .execute("if (typeof secret !== 'undefined') throw new Error('leak');")
            .unwrap();
    }
}
