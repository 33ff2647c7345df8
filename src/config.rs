//! Tunable parameters of the reconstruction pipeline.

/// Scalar knobs exposed to callers. Everything else in the pipeline is an
/// internal constant.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Lower bound on the carriageway width for accepting a link (m).
    pub minimal_path_width: f64,
    /// Vertical clearance of the tunnel/removal volume (m).
    pub tunnel_height: f64,
    /// Coefficient of the centerline regularity residuals.
    pub surface_regularity: f64,
    /// Coefficient of the data-attachment residuals.
    pub surface_attachment: f64,
    /// Coefficient of the contour regularity residuals.
    pub contour_regularity: f64,
    /// Coefficient of the expected-width residuals.
    pub surface_width: f64,
    /// Coefficient of the end-station centering residuals.
    pub centering: f64,
    /// Coefficient of the endpoint elevation residuals.
    pub border_elevation: f64,
    /// Coefficient of the one-sided border residuals.
    pub border_constraint: f64,
    /// Label-mismatch penalty added inside the attachment integrand.
    pub label_mismatch: f64,
    /// Upper bound on the post-solve cost of an accepted bridge.
    pub cost_threshold: f64,
    /// Traversal limit of the width estimator (m).
    pub neighborhood_radius: f64,
    /// Cross-section sampling step of the attachment integrand (m).
    pub integration_step: f64,
    /// Hole sampling density after integration (points / m^2).
    pub sampling_density: f64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            minimal_path_width: 2.0,
            tunnel_height: 3.0,
            surface_regularity: 10.0,
            surface_attachment: 1.0,
            contour_regularity: 1.0,
            surface_width: 2.0,
            centering: 1.0,
            border_elevation: 10.0,
            border_constraint: 100.0,
            label_mismatch: 15.0,
            cost_threshold: 50.0,
            neighborhood_radius: 50.0,
            integration_step: 0.3,
            sampling_density: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let cfg = ReconstructionConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        let back: ReconstructionConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: ReconstructionConfig =
            serde_json::from_str(r#"{"tunnel_height": 4.5}"#).unwrap();
        assert_eq!(cfg.tunnel_height, 4.5);
        assert_eq!(cfg.cost_threshold, 50.0);
    }
}
