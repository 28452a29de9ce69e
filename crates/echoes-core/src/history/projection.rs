//! Projections: how events become application state.

use serde::de::DeserializeOwned;

use crate::causal::EventIdentifier;
use crate::error::ErrorCode;

/// Errors a projection reports for an event it cannot apply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// The payload could not be decoded.
    #[error("payload could not be decoded: {0}")]
    Decode(String),

    /// The payload decoded but cannot be applied to the current model.
    #[error("event rejected by projection: {0}")]
    Rejected(String),
}

impl ProjectionError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::DecodeFailed
    }
}

/// A projection that can undo its own effects.
///
/// `forward` applies an event and returns a change record; handing that
/// record back to `backward` must restore the model exactly as it was
/// before `forward`. When `forward` fails it must leave the model
/// untouched.
pub trait TwoWayProjection {
    /// Application state built from events.
    type Model;
    /// What `backward` needs to undo one `forward`.
    type Change;

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// [`ProjectionError`] when the payload cannot be decoded or applied.
    fn forward(
        &self,
        model: &mut Self::Model,
        id: EventIdentifier,
        payload: &[u8],
    ) -> Result<Self::Change, ProjectionError>;

    /// Undo one earlier `forward` of the same event.
    fn backward(
        &self,
        model: &mut Self::Model,
        id: EventIdentifier,
        payload: &[u8],
        change: Self::Change,
    );
}

/// A projection that only moves forward.
///
/// Suitable for event types whose effect never needs undoing by hand; wrap
/// it in [`OneWay`] to use it with a [`History`](super::History).
pub trait OneWayProjection {
    /// Application state built from events.
    type Model;

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// [`ProjectionError`] when the payload cannot be decoded or applied.
    fn forward(
        &self,
        model: &mut Self::Model,
        id: EventIdentifier,
        payload: &[u8],
    ) -> Result<(), ProjectionError>;
}

/// Adapts a [`OneWayProjection`] into a [`TwoWayProjection`] by recording
/// the model as it was before each event.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneWay<P>(pub P);

impl<P> TwoWayProjection for OneWay<P>
where
    P: OneWayProjection,
    P::Model: Clone,
{
    type Model = P::Model;
    type Change = P::Model;

    fn forward(
        &self,
        model: &mut Self::Model,
        id: EventIdentifier,
        payload: &[u8],
    ) -> Result<Self::Change, ProjectionError> {
        let before = model.clone();
        match self.0.forward(model, id, payload) {
            Ok(()) => Ok(before),
            Err(err) => {
                *model = before;
                Err(err)
            }
        }
    }

    fn backward(
        &self,
        model: &mut Self::Model,
        _id: EventIdentifier,
        _payload: &[u8],
        change: Self::Change,
    ) {
        *model = change;
    }
}

/// Decode a JSON payload into a typed event.
///
/// # Errors
///
/// [`ProjectionError::Decode`] when the payload is not valid JSON for `T`.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProjectionError> {
    serde_json::from_slice(payload).map_err(|err| ProjectionError::Decode(err.to_string()))
}
