//! One filter operation end to end: build, fall back, merge, apply and
//! record history.

use crate::backend::SqlConnection;
use crate::backends::{set_layer_subset, BuildOutcome, EngineServices, FallbackReason, FilterBackend, OgrBuilder};
use crate::errors;
use crate::history::SubsetHistory;
use crate::layer::{LayerProps, ProviderType, VectorLayer};
use crate::mv::naming::view_references;
use crate::mv::{cleanup_session_materialized_views, drop_materialized_view, release_layer};
use crate::request::FilterRequest;
use crate::FilterMateError;

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub applied: bool,
    /// Backend that produced the applied filter.
    pub backend: ProviderType,
    pub fallback: Option<FallbackReason>,
    pub subset: String,
}

pub struct FilterSession {
    services: EngineServices,
    history: Option<SubsetHistory>,
}

impl FilterSession {
    pub fn new(services: EngineServices) -> Self {
        Self {
            services,
            history: None,
        }
    }

    pub fn with_history(mut self, history: SubsetHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn history(&self) -> Option<&SubsetHistory> {
        self.history.as_ref()
    }

    pub async fn filter_layer(
        &self,
        layer: &dyn VectorLayer,
        request: &FilterRequest,
    ) -> Result<FilterOutcome, FilterMateError> {
        let props = layer.props();
        let mut backend = FilterBackend::for_layer(props, &self.services);
        if !backend.supports_layer(props) {
            tracing::warn!(layer_id = %props.layer_id, provider = %props.provider, "backend does not claim this layer");
        }

        let mut fallback = None;
        let expression = match backend.build_expression(request).await? {
            BuildOutcome::Expression(expression) => expression,
            BuildOutcome::UseOgrFallback(reason) => {
                tracing::info!(layer_id = %props.layer_id, reason = reason.as_str(), "falling back to OGR");
                fallback = Some(reason);
                backend = FilterBackend::Ogr(OgrBuilder::new(self.services.clone()));
                match backend.build_expression(request).await? {
                    BuildOutcome::Expression(expression) => expression,
                    BuildOutcome::UseOgrFallback(reason) => {
                        return Err(errors::invalid_request_error(&format!(
                            "no backend can express this filter: {}",
                            reason.as_str()
                        )))
                    }
                }
            }
        };

        let previous_subset = layer.subset_string();
        let old_subset = Some(previous_subset.as_str()).filter(|old| !old.trim().is_empty());
        let built_views = view_references(&expression, &self.services.config.temp_schema);
        let applied = match backend
            .apply_filter(layer, &expression, old_subset, request.combine_operator)
            .await
        {
            Ok(applied) => applied,
            Err(error) => {
                self.release_unapplied_views(layer, built_views, &previous_subset).await;
                return Err(error);
            }
        };
        let subset = layer.subset_string();
        if !applied {
            self.release_unapplied_views(layer, built_views, &subset).await;
        } else if let Some(history) = &self.history {
            history
                .record(&props.layer_id, request.source.layer_id.as_deref(), &subset)
                .await?;
        }

        Ok(FilterOutcome {
            applied,
            backend: backend.provider(),
            fallback,
            subset,
        })
    }

    /// Restores the subset that preceded the latest one. Returns the
    /// restored subset, `None` when there was nothing to undo.
    pub async fn unfilter(&self, layer: &dyn VectorLayer) -> Result<Option<String>, FilterMateError> {
        let history = self.require_history()?;
        let layer_id = &layer.props().layer_id;
        if history.pop_latest(layer_id).await?.is_none() {
            return Ok(None);
        }
        let previous = history
            .latest(layer_id)
            .await?
            .map(|entry| entry.subset_string)
            .unwrap_or_default();
        if !set_layer_subset(layer, &previous) {
            return Err(errors::history_error(&format!(
                "layer `{layer_id}` rejected its previous subset string"
            )));
        }
        let held = self.services.tracker.views_for_layer(layer_id);
        let dropped = self.release_views_not_in(layer.props(), held, &previous).await?;
        if !dropped.is_empty() {
            tracing::debug!(layer_id, views = ?dropped, "dropped views left behind by unfilter");
        }
        Ok(Some(previous))
    }

    /// Clears the layer's filter and history and releases its views.
    /// Returns the views that were dropped.
    pub async fn reset(&self, layer: &dyn VectorLayer) -> Result<Vec<String>, FilterMateError> {
        let props = layer.props();
        if !set_layer_subset(layer, "") {
            return Err(errors::history_error(&format!(
                "layer `{}` rejected clearing its subset string",
                props.layer_id
            )));
        }
        if let Some(history) = &self.history {
            let removed = history.delete_for_layer(&props.layer_id).await?;
            tracing::debug!(layer_id = %props.layer_id, removed, "history cleared");
        }

        let Some(provider) = self.services.connections.as_ref() else {
            let released = self
                .services
                .tracker
                .remove_all_references_for_layer(&props.layer_id);
            if !released.is_empty() {
                tracing::warn!(layer_id = %props.layer_id, views = ?released, "no connection to drop released views");
            }
            return Ok(Vec::new());
        };
        let connection = provider.connection_for_layer(props).await?;
        release_layer(
            connection.connection.as_ref(),
            &self.services.tracker,
            &self.services.config.temp_schema,
            &props.layer_id,
        )
        .await
    }

    /// Drops this session's unreferenced views, typically on shutdown.
    pub async fn cleanup(&self, connection: &dyn SqlConnection) -> Result<Vec<String>, FilterMateError> {
        cleanup_session_materialized_views(
            connection,
            &self.services.tracker,
            &self.services.config.temp_schema,
            &self.services.config.session_id,
        )
        .await
    }

    /// Gives up the references a filter that never took effect registered.
    /// Failures are logged so the caller's own outcome wins.
    async fn release_unapplied_views(
        &self,
        layer: &dyn VectorLayer,
        built_views: Vec<String>,
        live_subset: &str,
    ) {
        if built_views.is_empty() {
            return;
        }
        let layer_id = &layer.props().layer_id;
        match self.release_views_not_in(layer.props(), built_views, live_subset).await {
            Ok(dropped) if !dropped.is_empty() => {
                tracing::info!(layer_id, views = ?dropped, "dropped views of an unapplied filter");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(layer_id, %error, "could not drop views of an unapplied filter");
            }
        }
    }

    /// Releases the layer's references to `candidates` that `live_subset`
    /// does not read and drops the views left without any reference.
    async fn release_views_not_in(
        &self,
        props: &LayerProps,
        candidates: impl IntoIterator<Item = String>,
        live_subset: &str,
    ) -> Result<Vec<String>, FilterMateError> {
        let tracker = &self.services.tracker;
        let live = view_references(live_subset, &self.services.config.temp_schema);
        let mut droppable = Vec::new();
        for mv_name in candidates {
            if live.contains(&mv_name) || !tracker.references_for(&mv_name).contains(&props.layer_id) {
                continue;
            }
            if tracker.remove_reference(&mv_name, &props.layer_id) {
                droppable.push(mv_name);
            }
        }
        if droppable.is_empty() {
            return Ok(droppable);
        }

        let Some(provider) = self.services.connections.as_ref() else {
            tracing::warn!(layer_id = %props.layer_id, views = ?droppable, "no connection to drop released views");
            return Ok(Vec::new());
        };
        let connection = provider.connection_for_layer(props).await?;
        let connection = connection.connection.as_ref();
        let mut dropped = Vec::new();
        for mv_name in droppable {
            if drop_materialized_view(connection, &self.services.config.temp_schema, &mv_name).await? {
                dropped.push(mv_name);
            }
        }
        if !dropped.is_empty() {
            connection.commit().await?;
        }
        Ok(dropped)
    }

    fn require_history(&self) -> Result<&SubsetHistory, FilterMateError> {
        self.history
            .as_ref()
            .ok_or_else(|| errors::history_error("no history store is configured"))
    }
}
