use crate::plugin::{StageContext, StageContract, StageOutcome};
use ando_core::spec::{ApiSpec, PluginDriverKind};
use async_trait::async_trait;
use mlua::{Lua, Value as LuaValue};
use serde_json::Value;

/// A custom middleware hook (one of a `MiddlewareBundle`'s `pre`,
/// `post_auth`, `post` entries, or its `auth_check` override) compiled into
/// a stage. The hook's `driver` selects how the
/// body in `script` is executed; only `ScriptVm` actually runs code here --
/// `Subprocess` and `Native` are represented structurally and fail closed
/// if reached, since wiring a real subprocess/dylib loader is out of scope.
pub struct MiddlewareHookStage {
    pub hook_name: String,
    pub driver: PluginDriverKind,
    /// Lua source run for `ScriptVm` hooks. Expected to define a global
    /// function `handle(method, path) -> boolean, string|nil` returning
    /// `false` (and an optional reason) to reject the request.
    pub script: String,
}

#[async_trait]
impl StageContract for MiddlewareHookStage {
    fn name(&self) -> &str {
        &self.hook_name
    }

    fn enabled_for(&self, _spec: &ApiSpec) -> bool {
        true
    }

    async fn process(&self, ctx: &mut StageContext, _config: &Value) -> StageOutcome {
        match self.driver {
            PluginDriverKind::ScriptVm => self.run_script(ctx).await,
            PluginDriverKind::Subprocess | PluginDriverKind::Native => {
                StageOutcome::Error(format!("hook '{}' declares a {:?} driver, which this build cannot invoke", self.hook_name, self.driver))
            }
        }
    }
}

impl MiddlewareHookStage {
    async fn run_script(&self, ctx: &mut StageContext) -> StageOutcome {
        let lua = Lua::new();
        if let Err(e) = lua.load(&self.script).exec() {
            return StageOutcome::Error(format!("hook '{}' failed to load: {e}", self.hook_name));
        }

        let handle: mlua::Function = match lua.globals().get("handle") {
            Ok(f) => f,
            Err(e) => return StageOutcome::Error(format!("hook '{}' defines no `handle`: {e}", self.hook_name)),
        };

        let result: mlua::Result<(bool, LuaValue)> = handle.call((ctx.request_method.clone(), ctx.request_path.clone()));
        match result {
            Ok((true, _)) => StageOutcome::Continue,
            Ok((false, reason)) => {
                let reason = match reason {
                    LuaValue::String(s) => s.to_str().map(|s| s.to_string()).unwrap_or_default(),
                    _ => "rejected by custom middleware".to_string(),
                };
                StageOutcome::Respond {
                    status: 403,
                    headers: Default::default(),
                    body: Some(reason.into_bytes()),
                }
            }
            Err(e) => StageOutcome::Error(format!("hook '{}' raised: {e}", self.hook_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as Json;

    fn ctx() -> StageContext {
        StageContext::new("GET".into(), "/foo".into(), Default::default(), "127.0.0.1".into(), "api1".into())
    }

    #[tokio::test]
    async fn script_vm_hook_continues_when_handle_returns_true() {
        let stage = MiddlewareHookStage {
            hook_name: "pre-check".into(),
            driver: PluginDriverKind::ScriptVm,
            script: "function handle(method, path) return true end".into(),
        };
        let mut c = ctx();
        assert!(matches!(stage.process(&mut c, &Json::Null).await, StageOutcome::Continue));
    }

    #[tokio::test]
    async fn script_vm_hook_rejects_when_handle_returns_false() {
        let stage = MiddlewareHookStage {
            hook_name: "pre-check".into(),
            driver: PluginDriverKind::ScriptVm,
            script: "function handle(method, path) return false, 'blocked' end".into(),
        };
        let mut c = ctx();
        match stage.process(&mut c, &Json::Null).await {
            StageOutcome::Respond { status, body, .. } => {
                assert_eq!(status, 403);
                assert_eq!(body.unwrap(), b"blocked");
            }
            other => panic!("expected Respond, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subprocess_driver_is_not_invokable_in_this_build() {
        let stage = MiddlewareHookStage {
            hook_name: "legacy-auth".into(),
            driver: PluginDriverKind::Subprocess,
            script: String::new(),
        };
        let mut c = ctx();
        assert!(matches!(stage.process(&mut c, &Json::Null).await, StageOutcome::Error(_)));
    }
}
