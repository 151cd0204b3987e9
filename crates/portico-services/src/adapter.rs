//! Device-adapter seam — the bridge to the on-premise infrastructure.
//!
//! The adapter turns a parsed request into a call against a local device
//! driver and wraps the outcome in a [`Response`]. Adapters report failure
//! either as an `Err` or as a response with the error flag set; the session
//! converts both into an error response for the requester and never lets
//! them propagate further.
//!
//! Routing fields on returned responses are left blank — the session stamps
//! the correlation id and source/destination before anything goes out.

use anyhow::Result;
use portico_core::{OrderedMap, Response};

pub trait DeviceAdapter: Send + Sync {
    /// List the properties the destination object exposes.
    fn get_properties_list(
        &self,
        source_oid: &str,
        destination_oid: &str,
        body: Option<&str>,
        parameters: &OrderedMap,
    ) -> Result<Response>;

    /// Read one property value.
    fn get_property(
        &self,
        source_oid: &str,
        destination_oid: &str,
        property_id: &str,
        body: Option<&str>,
        parameters: &OrderedMap,
    ) -> Result<Response>;

    /// Write one property value.
    fn set_property(
        &self,
        source_oid: &str,
        destination_oid: &str,
        property_id: &str,
        body: Option<&str>,
        parameters: &OrderedMap,
    ) -> Result<Response>;

    /// List the actions the destination object can execute.
    fn get_actions_list(
        &self,
        source_oid: &str,
        destination_oid: &str,
        body: Option<&str>,
        parameters: &OrderedMap,
    ) -> Result<Response>;

    /// Begin executing an action. The response conventionally carries the
    /// device's task reference in its body.
    fn start_action(
        &self,
        source_oid: &str,
        destination_oid: &str,
        action_id: &str,
        body: Option<&str>,
        parameters: &OrderedMap,
    ) -> Result<Response>;

    /// Abort a running action.
    fn cancel_task(
        &self,
        source_oid: &str,
        destination_oid: &str,
        action_id: &str,
        body: Option<&str>,
        parameters: &OrderedMap,
    ) -> Result<Response>;

    /// Deliver an event this gateway is subscribed to.
    fn forward_event(
        &self,
        source_oid: &str,
        destination_oid: &str,
        event_id: &str,
        body: Option<&str>,
        parameters: &OrderedMap,
    ) -> Result<Response>;
}
