//! Function registration and lookup.
use crate::config::TimeoutConfig;
use crate::deadline::bounded;
use crate::error::ControlPlaneResult;
use crate::model::{Function, FunctionStatus, FunctionUpdate, User};
use crate::store::FunctionStore;
use std::sync::Arc;
use uuid::Uuid;

/// What an endpoint needs to execute a registered function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFunction {
    pub code: String,
    pub entry_point: String,
}

pub struct FunctionRegistry {
    functions: Arc<dyn FunctionStore>,
    timeouts: TimeoutConfig,
}

impl FunctionRegistry {
    pub fn new(functions: Arc<dyn FunctionStore>, timeouts: TimeoutConfig) -> Self {
        Self {
            functions,
            timeouts,
        }
    }

    /// Store a new function version and return its freshly minted uuid.
    ///
    /// Names are not deduplicated; each call is an independent registration.
    pub async fn register(
        &self,
        owner: &User,
        name: &str,
        description: &str,
        code: &str,
        entry_point: &str,
    ) -> ControlPlaneResult<String> {
        let function = Function {
            function_uuid: Uuid::new_v4().to_string(),
            owner_id: owner.id,
            name: name.to_string(),
            description: description.to_string(),
            status: FunctionStatus::Registered,
            code: code.to_string(),
            entry_point: entry_point.to_string(),
        };
        let stored = bounded(
            self.timeouts.store,
            "function registration",
            self.functions.insert_function(function),
        )
        .await?;
        metrics::counter!("fnplane_functions_registered_total").increment(1);
        tracing::info!(
            owner_id = owner.id,
            function_uuid = %stored.function_uuid,
            name,
            "function registered"
        );
        Ok(stored.function_uuid)
    }

    /// Code and entry point of the newest row for `owner` and `function_uuid`.
    pub async fn resolve(
        &self,
        owner: &User,
        function_uuid: &str,
    ) -> ControlPlaneResult<ResolvedFunction> {
        let function = bounded(
            self.timeouts.store,
            "function lookup",
            self.functions.latest_function(owner.id, function_uuid),
        )
        .await
        .map_err(|err| err.for_entity("function"))?;
        Ok(ResolvedFunction {
            code: function.code,
            entry_point: function.entry_point,
        })
    }

    /// Rewrite the newest version the owner holds under `function_uuid`.
    pub async fn update(
        &self,
        owner: &User,
        function_uuid: &str,
        update: FunctionUpdate,
    ) -> ControlPlaneResult<()> {
        bounded(
            self.timeouts.store,
            "function update",
            self.functions
                .update_function(owner.id, function_uuid, update),
        )
        .await
        .map_err(|err| err.for_entity("function"))?;
        tracing::info!(owner_id = owner.id, function_uuid, "function updated");
        Ok(())
    }

    /// Drop every version the owner holds under `function_uuid`, along with
    /// its sharing groups.
    pub async fn delete(&self, owner: &User, function_uuid: &str) -> ControlPlaneResult<()> {
        bounded(
            self.timeouts.store,
            "function delete",
            self.functions.delete_function(owner.id, function_uuid),
        )
        .await
        .map_err(|err| err.for_entity("function"))?;
        metrics::counter!("fnplane_functions_deleted_total").increment(1);
        tracing::info!(owner_id = owner.id, function_uuid, "function deleted");
        Ok(())
    }

    /// Let members of `group_id` run the function. Only the owner may share.
    pub async fn share_with_group(
        &self,
        owner: &User,
        function_uuid: &str,
        group_id: &str,
    ) -> ControlPlaneResult<()> {
        bounded(
            self.timeouts.store,
            "function lookup",
            self.functions.latest_function(owner.id, function_uuid),
        )
        .await
        .map_err(|err| err.for_entity("function"))?;
        bounded(
            self.timeouts.store,
            "function group insert",
            self.functions.add_function_group(function_uuid, group_id),
        )
        .await?;
        tracing::info!(function_uuid, group_id, "function shared with group");
        Ok(())
    }

    pub async fn access_groups(&self, function_uuid: &str) -> ControlPlaneResult<Vec<String>> {
        bounded(
            self.timeouts.store,
            "function group lookup",
            self.functions.function_groups(function_uuid),
        )
        .await
    }
}
