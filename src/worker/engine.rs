//! Embedded JavaScript engine wrapper
//!
//! Loads a solution file as an ES module, resolves its exported level
//! functions and converts values crossing the engine boundary. Relative
//! imports resolve against the solution's own directory.

use std::cell::RefCell;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc::Sender;

use boa_engine::builtins::promise::PromiseState;
use boa_engine::module::SimpleModuleLoader;
use boa_engine::object::builtins::JsPromise;
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsError, JsObject, JsResult, JsString, JsValue, Module, NativeFunction, Source,
};

use crate::answer::RawAnswer;
use crate::error::{SolutionError, ThrownValue};
use crate::protocol::ProtocolMessage;

/// Function name reported when module top-level code throws
pub const MODULE_TOP_LEVEL: &str = "<module top level>";

/// `console.*` forwards every call straight to the host `__aocEmit` binding
const CONSOLE_SHIM: &str = r#"
var console = (function (emitNative) {
    function serialize(value) {
        if (value === undefined) {
            return null;
        }
        try {
            var json = JSON.stringify(value);
            return json === undefined ? String(value) : JSON.parse(json);
        } catch (e) {
            return String(value);
        }
    }
    function emit(level) {
        return function () {
            var args = Array.prototype.slice.call(arguments);
            var first = args.length > 0 ? args.shift() : "";
            emitNative(
                level,
                typeof first === "string" ? first : JSON.stringify(serialize(first)),
                JSON.stringify(args.map(serialize))
            );
        };
    }
    return {
        log: emit("info"),
        info: emit("info"),
        debug: emit("debug"),
        warn: emit("warn"),
        error: emit("error")
    };
})(__aocEmit);
"#;

/// Primitive held by a `String` wrapper object, `undefined` for anything else
const STRING_VALUE: &str = r#"
(function (value) {
    try {
        return String.prototype.valueOf.call(value);
    } catch (e) {
        return undefined;
    }
})
"#;

thread_local! {
    static CONSOLE: RefCell<Option<Sender<ProtocolMessage>>> = const { RefCell::new(None) };
}

/// Points this thread's console at a message channel until dropped
struct ConsoleRoute;

impl ConsoleRoute {
    fn install(sender: Sender<ProtocolMessage>) -> Self {
        CONSOLE.with(|route| *route.borrow_mut() = Some(sender));
        Self
    }
}

impl Drop for ConsoleRoute {
    fn drop(&mut self) {
        CONSOLE.with(|route| route.borrow_mut().take());
    }
}

/// `__aocEmit(level, message, metaJson)`
fn console_emit(_this: &JsValue, args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    let text = |index: usize| {
        args.get(index)
            .and_then(|v| v.as_string())
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default()
    };

    let message = ProtocolMessage::Log {
        level: text(0),
        message: text(1),
        meta: serde_json::from_str(&text(2)).unwrap_or_default(),
    };

    // A closed channel means the forwarder already stopped and reports why
    CONSOLE.with(|route| {
        if let Some(sender) = route.borrow().as_ref() {
            let _ = sender.send(message);
        }
    });
    Ok(JsValue::undefined())
}

fn install_console(context: &mut Context) -> JsResult<()> {
    let emit = FunctionObjectBuilder::new(context.realm(), NativeFunction::from_fn_ptr(console_emit))
        .name(js_string!("__aocEmit"))
        .length(3)
        .constructor(false)
        .build();
    context.register_global_property(js_string!("__aocEmit"), emit, Attribute::all())?;
    context.eval(Source::from_bytes(CONSOLE_SHIM))?;
    Ok(())
}

/// A loaded and evaluated solution module
pub struct SolutionModule {
    // Engine objects are declared before the context so they drop first
    namespace: JsObject,
    string_value: JsObject,
    path: PathBuf,
    context: Context,
    _console: ConsoleRoute,
}

impl SolutionModule {
    /// Load `path`, sending console output to `console` as it happens
    pub fn load(path: &Path, console: Sender<ProtocolMessage>) -> Result<Self, SolutionError> {
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SolutionError::UserSolutionFileNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                return Err(SolutionError::internal(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let module_path = fs::canonicalize(path).map_err(|e| {
            SolutionError::internal(format!("Failed to resolve {}: {}", path.display(), e))
        })?;
        let root = module_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        let console = ConsoleRoute::install(console);
        let loader = Rc::new(SimpleModuleLoader::new(&root).map_err(|e| {
            SolutionError::internal(format!("Failed to open module root {}: {}", root.display(), e))
        })?);
        let mut context = Context::builder()
            .module_loader(loader.clone())
            .build()
            .map_err(|e| SolutionError::internal(format!("Failed to create engine: {}", e)))?;

        install_console(&mut context)
            .map_err(|e| SolutionError::internal(format!("Failed to install console: {}", e)))?;
        let string_value = context
            .eval(Source::from_bytes(STRING_VALUE))
            .ok()
            .and_then(|f| f.as_callable().cloned())
            .ok_or_else(|| SolutionError::internal("Failed to install answer conversion"))?;

        let module = Module::parse(
            Source::from_reader(source.as_bytes(), Some(&module_path)),
            None,
            &mut context,
        )
        .map_err(|e| SolutionError::UserSolutionSyntaxError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        loader.insert(module_path.clone(), module.clone());

        let loading = module.load(&mut context);
        context.run_jobs();
        match loading.state() {
            PromiseState::Fulfilled(_) => {}
            PromiseState::Rejected(reason) => {
                let cause = thrown_value(JsError::from_opaque(reason), &mut context);
                return Err(import_failure(&root, path, cause));
            }
            PromiseState::Pending => {
                return Err(SolutionError::internal("Module imports did not finish loading"))
            }
        }

        module
            .link(&mut context)
            .map_err(|e| SolutionError::UserSolutionSyntaxError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let evaluation = module.evaluate(&mut context);
        context.run_jobs();

        match evaluation.state() {
            PromiseState::Fulfilled(_) => {}
            PromiseState::Rejected(reason) => {
                let cause = thrown_value(JsError::from_opaque(reason), &mut context);
                return Err(SolutionError::UserSolutionThrew {
                    function: MODULE_TOP_LEVEL.to_string(),
                    cause,
                });
            }
            PromiseState::Pending => {
                return Err(SolutionError::UserSolutionThrew {
                    function: MODULE_TOP_LEVEL.to_string(),
                    cause: ThrownValue {
                        name: "Error".to_string(),
                        message: "module evaluation did not complete (top-level await is not supported)"
                            .to_string(),
                        stack: None,
                    },
                })
            }
        }

        let namespace = module.namespace(&mut context);
        Ok(Self {
            namespace,
            string_value,
            path: path.to_path_buf(),
            context,
            _console: console,
        })
    }

    /// Resolve a named export that must be callable
    pub fn function(&mut self, name: &str) -> Result<JsObject, SolutionError> {
        let missing = || SolutionError::UserSolutionMissingFunction {
            path: self.path.clone(),
            function: name.to_string(),
        };

        let export = self
            .namespace
            .get(JsString::from(name), &mut self.context)
            .map_err(|_| missing())?;
        export.as_callable().cloned().ok_or_else(missing)
    }

    /// Build the `{ input, lines }` argument object
    pub fn prepare_input(&mut self, input: &str, lines: &[String]) -> Result<JsValue, SolutionError> {
        let argument = serde_json::json!({ "input": input, "lines": lines });
        JsValue::from_json(&argument, &mut self.context)
            .map_err(|e| SolutionError::internal(format!("Failed to pass input: {}", e)))
    }

    pub fn call(&mut self, function: &JsObject, argument: JsValue) -> Result<RawAnswer, ThrownValue> {
        match function.call(&JsValue::undefined(), &[argument], &mut self.context) {
            Ok(value) => Ok(self.raw_answer(&value)),
            Err(err) => Err(thrown_value(err, &mut self.context)),
        }
    }

    /// Numbers and strings are answers; `new String(..)` counts as its text
    fn raw_answer(&mut self, value: &JsValue) -> RawAnswer {
        if let Some(n) = value.as_number() {
            return RawAnswer::Number(n);
        }
        if let Some(s) = value.as_string() {
            return RawAnswer::Text(s.to_std_string_escaped());
        }
        if value.as_object().is_some_and(|object| !object.is_callable()) {
            let unwrapped = self
                .string_value
                .call(&JsValue::undefined(), &[value.clone()], &mut self.context);
            if let Some(s) = unwrapped.ok().as_ref().and_then(|v| v.as_string()) {
                return RawAnswer::Text(s.to_std_string_escaped());
            }
        }
        RawAnswer::Unsupported(type_name(value).to_string())
    }
}

/// Runtime type name, refining `typeof` for arrays, promises and null
fn type_name(value: &JsValue) -> &'static str {
    if value.is_undefined() {
        "undefined"
    } else if value.is_null() {
        "null"
    } else if value.is_boolean() {
        "boolean"
    } else if value.is_number() {
        "number"
    } else if value.is_string() {
        "string"
    } else if value.is_bigint() {
        "bigint"
    } else if value.is_symbol() {
        "symbol"
    } else if let Some(object) = value.as_object() {
        if object.is_callable() {
            "function"
        } else if object.is_array() {
            "array"
        } else if JsPromise::from_object(object.clone()).is_ok() {
            "promise"
        } else {
            "object"
        }
    } else {
        "unknown"
    }
}

fn thrown_value(err: JsError, context: &mut Context) -> ThrownValue {
    let value = err.to_opaque(context);
    let stack = value
        .as_object()
        .and_then(|object| object.get(js_string!("stack"), context).ok())
        .and_then(|stack| stack.as_string().map(|s| s.to_std_string_escaped()));

    match err.try_native(context) {
        Ok(native) => ThrownValue {
            name: native.kind.to_string(),
            message: native.message().to_string(),
            stack,
        },
        Err(_) => {
            let message = value
                .to_string(context)
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_else(|_| value.display().to_string());
            ThrownValue {
                name: type_name(&value).to_string(),
                message,
                stack,
            }
        }
    }
}

/// Map a failed import to the file at fault.
///
/// The module loader names the specifier in backticks. A specifier with no
/// file behind it is a missing file; otherwise the file failed to parse.
fn import_failure(root: &Path, solution: &Path, cause: ThrownValue) -> SolutionError {
    match quoted_specifier(&cause.message) {
        Some(specifier) => {
            let path = root.join(specifier.trim_start_matches("./"));
            if path.exists() {
                SolutionError::UserSolutionSyntaxError {
                    path,
                    message: cause.to_string(),
                }
            } else {
                SolutionError::UserSolutionFileNotFound { path }
            }
        }
        None => SolutionError::UserSolutionSyntaxError {
            path: solution.to_path_buf(),
            message: cause.to_string(),
        },
    }
}

fn quoted_specifier(message: &str) -> Option<&str> {
    let start = message.find('`')? + 1;
    let len = message[start..].find('`')?;
    Some(&message[start..start + len])
}
