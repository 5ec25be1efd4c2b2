//! Placeholders every installation gets without registering anything.

use super::PlaceholderRegistry;
use crate::error::PlaceholderError;

pub(super) fn register_builtins(registry: &PlaceholderRegistry) {
    registry.register_inline("name", |ctx| Ok(ctx.subject().display_name.clone()));
    registry.register_inline("server", |ctx| Ok(ctx.subject().server.clone()));
    registry.register_inline("ping", |ctx| Ok(ctx.subject().ping.to_string()));
    registry.register_inline("viewer", |ctx| Ok(ctx.viewer.display_name.clone()));
    registry.register_inline("viewer_server", |ctx| Ok(ctx.viewer.server.clone()));
    registry.register_inline("online", |ctx| Ok(ctx.roster.len().to_string()));

    // %server_online% counts the viewer's server, %server_online:<name>% any other.
    registry.register_inline("server_online", |ctx| {
        let server = ctx.args.unwrap_or(ctx.viewer.server.as_str());
        Ok(ctx.roster.count_on(server).to_string())
    });

    registry.register_inline("attr", |ctx| {
        let key = ctx
            .args
            .filter(|key| !key.is_empty())
            .ok_or_else(|| PlaceholderError::Failed("%attr% needs a key, e.g. %attr:rank%".to_string()))?;
        Ok(ctx.subject().attributes.get(key).cloned().unwrap_or_default())
    });
}
