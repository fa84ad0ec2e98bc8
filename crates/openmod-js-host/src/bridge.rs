//! Capability objects injected into a script's globals.
//!
//! Two globals are defined per context:
//!
//! - `openmod`: `getService(typeRef)`, `getRequiredService(typeRef)`,
//!   `getType(name)`
//! - `logger`: `trace`, `dbg`/`debug`, `info`, `warn`, `err`/`error`,
//!   `critical`
//!
//! Both globals are non-writable and non-configurable, their members are
//! non-writable, non-configurable and non-enumerable, and the objects are
//! frozen. Resolved services reach the script as frozen proxy objects with
//! one function per declared method; values cross as JSON.

use crate::error::ServiceError;
use crate::logging::{LogLevel, ScriptLogger};
use crate::services::{HostService, ScopedServiceResolver, TypeHandle, TypeRef};
use openmod_js_runtime::rquickjs::{
    self, convert::Coerced, function::Rest, object::Property, Ctx, Exception, Function, Object,
    Value,
};
use std::sync::Arc;

/// Global holding the service lookup functions.
pub const SERVICES_GLOBAL: &str = "openmod";

/// Global holding the logging functions.
pub const LOGGER_GLOBAL: &str = "logger";

/// Property carrying a type handle's name.
const HANDLE_NAME: &str = "name";

const LOGGER_METHODS: &[(&str, LogLevel)] = &[
    ("trace", LogLevel::Trace),
    ("dbg", LogLevel::Debug),
    ("debug", LogLevel::Debug),
    ("info", LogLevel::Info),
    ("warn", LogLevel::Warn),
    ("err", LogLevel::Error),
    ("error", LogLevel::Error),
    ("critical", LogLevel::Critical),
];

/// Service lookup as seen by one script.
#[derive(Clone)]
pub struct OpenModFunctions {
    resolver: ScopedServiceResolver,
}

impl OpenModFunctions {
    pub fn new(resolver: ScopedServiceResolver) -> Self {
        Self { resolver }
    }

    /// The service for `type_ref`, or `None` if nothing is registered.
    pub fn get_service(
        &self,
        type_ref: &TypeRef,
    ) -> Result<Option<Arc<dyn HostService>>, ServiceError> {
        self.resolver.resolve(type_ref)
    }

    /// The service for `type_ref`; fails with `ServiceNotFound` if absent.
    pub fn get_required_service(
        &self,
        type_ref: &TypeRef,
    ) -> Result<Arc<dyn HostService>, ServiceError> {
        self.resolver.resolve_required(type_ref)
    }

    /// Handle of the type exposed as `name`.
    pub fn get_type(&self, name: &str) -> Option<TypeHandle> {
        self.resolver.get_type(name)
    }
}

/// Define the `openmod` and `logger` globals in `ctx`.
pub fn install<'js>(
    ctx: &Ctx<'js>,
    functions: Arc<OpenModFunctions>,
    logger: Arc<ScriptLogger>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let services = services_object(ctx, functions)?;
    let log = logger_object(ctx, logger)?;

    globals.prop(SERVICES_GLOBAL, Property::from(services))?;
    globals.prop(LOGGER_GLOBAL, Property::from(log))?;
    Ok(())
}

fn services_object<'js>(
    ctx: &Ctx<'js>,
    functions: Arc<OpenModFunctions>,
) -> rquickjs::Result<Object<'js>> {
    let obj = Object::new(ctx.clone())?;

    let f = Arc::clone(&functions);
    let get_service = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, type_ref: Value<'js>| -> rquickjs::Result<Value<'js>> {
            let type_ref = type_ref_from_js(&ctx, &type_ref)?;
            match f.get_service(&type_ref) {
                Ok(Some(service)) => Ok(service_proxy(&ctx, service)?.into_value()),
                Ok(None) => Ok(Value::new_null(ctx.clone())),
                Err(e) => Err(throw(&ctx, &e)),
            }
        },
    )?
    .with_name("getService")?;
    lock_member(&obj, "getService", get_service)?;

    let f = Arc::clone(&functions);
    let get_required_service = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, type_ref: Value<'js>| -> rquickjs::Result<Object<'js>> {
            let type_ref = type_ref_from_js(&ctx, &type_ref)?;
            match f.get_required_service(&type_ref) {
                Ok(service) => service_proxy(&ctx, service),
                Err(e) => Err(throw(&ctx, &e)),
            }
        },
    )?
    .with_name("getRequiredService")?;
    lock_member(&obj, "getRequiredService", get_required_service)?;

    let f = functions;
    let get_type = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, name: Coerced<String>| -> rquickjs::Result<Value<'js>> {
            match f.get_type(&name.0) {
                Some(_) => Ok(handle_object(&ctx, &name.0)?.into_value()),
                None => Ok(Value::new_null(ctx.clone())),
            }
        },
    )?
    .with_name("getType")?;
    lock_member(&obj, "getType", get_type)?;

    freeze(ctx, &obj)?;
    Ok(obj)
}

fn logger_object<'js>(
    ctx: &Ctx<'js>,
    logger: Arc<ScriptLogger>,
) -> rquickjs::Result<Object<'js>> {
    let obj = Object::new(ctx.clone())?;

    for &(name, level) in LOGGER_METHODS {
        let logger = Arc::clone(&logger);
        let log = Function::new(ctx.clone(), move |message: Coerced<String>| {
            logger.log(level, &message.0);
        })?
        .with_name(name)?;
        lock_member(&obj, name, log)?;
    }

    freeze(ctx, &obj)?;
    Ok(obj)
}

/// A handle carries the name the type is exposed under, not the Rust type
/// name, so it resolves back to the same registration.
fn handle_object<'js>(ctx: &Ctx<'js>, exposed_name: &str) -> rquickjs::Result<Object<'js>> {
    let obj = Object::new(ctx.clone())?;
    obj.prop(HANDLE_NAME, Property::from(exposed_name.to_string()))?;
    freeze(ctx, &obj)?;
    Ok(obj)
}

fn service_proxy<'js>(
    ctx: &Ctx<'js>,
    service: Arc<dyn HostService>,
) -> rquickjs::Result<Object<'js>> {
    let obj = Object::new(ctx.clone())?;

    for &method in service.methods() {
        let service = Arc::clone(&service);
        let call = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let args = args
                    .0
                    .iter()
                    .map(|arg| to_json(&ctx, arg))
                    .collect::<rquickjs::Result<Vec<_>>>()?;

                match service.invoke(method, &args) {
                    Ok(result) => from_json(&ctx, &result),
                    Err(e) => Err(throw(&ctx, &e)),
                }
            },
        )?
        .with_name(method)?;
        lock_member(&obj, method, call)?;
    }

    freeze(ctx, &obj)?;
    Ok(obj)
}

/// Accept a type name string or a handle returned by `getType`.
fn type_ref_from_js<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> rquickjs::Result<TypeRef> {
    if let Some(name) = value.as_string() {
        return Ok(TypeRef::Name(name.to_string()?));
    }

    if !value.is_function() {
        if let Some(obj) = value.as_object() {
            if let Some(name) = obj.get::<_, Option<String>>(HANDLE_NAME)? {
                return Ok(TypeRef::Name(name));
            }
        }
    }

    Err(Exception::throw_type(
        ctx,
        "expected a type name or a handle returned by openmod.getType",
    ))
}

fn lock_member<'js>(
    obj: &Object<'js>,
    name: &str,
    function: Function<'js>,
) -> rquickjs::Result<()> {
    obj.prop(name, Property::from(function))
}

fn freeze<'js>(ctx: &Ctx<'js>, obj: &Object<'js>) -> rquickjs::Result<()> {
    let object: Object<'js> = ctx.globals().get("Object")?;
    let freeze: Function<'js> = object.get("freeze")?;
    freeze.call::<_, Value<'js>>((obj.clone(),))?;
    Ok(())
}

fn throw(ctx: &Ctx<'_>, err: &ServiceError) -> rquickjs::Error {
    Exception::throw_message(ctx, &err.to_string())
}

fn to_json<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> rquickjs::Result<serde_json::Value> {
    let Some(text) = ctx.json_stringify(value.clone())? else {
        return Ok(serde_json::Value::Null);
    };
    let text = text.to_string()?;
    serde_json::from_str(&text)
        .map_err(|e| Exception::throw_type(ctx, &format!("argument is not JSON: {}", e)))
}

fn from_json<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    if value.is_null() {
        return Ok(Value::new_null(ctx.clone()));
    }
    ctx.json_parse(value.to_string())
}
