use thiserror::Error;

/// Failure kinds raised inside the capture controller.
///
/// None of these ever reach a command issuer; they are logged and the
/// controller falls back to a closed state.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("controller is shutting down")]
    ShuttingDown,

    #[error("{0} callback was dropped before completing")]
    CallbackDropped(&'static str),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("session configuration failed: {0}")]
    ConfigureFailed(String),

    #[error("camera {0} disconnected")]
    Disconnected(String),

    #[error("camera {0} reports no jpeg output sizes")]
    NoOutputSizes(String),

    #[error("unknown camera {0}")]
    UnknownSensor(String),
}

#[cfg(test)]
mod tests {
    use super::CameraError;

    #[test]
    fn errors_survive_anyhow_round_trip() {
        let err: anyhow::Error = CameraError::NoOutputSizes("2".to_string()).into();
        let err = err.context("initialize camera");

        let inner = err
            .downcast_ref::<CameraError>()
            .expect("camera error should be recoverable");
        assert!(matches!(inner, CameraError::NoOutputSizes(id) if id == "2"));
        assert!(format!("{err:#}").contains("no jpeg output sizes"));
    }
}
