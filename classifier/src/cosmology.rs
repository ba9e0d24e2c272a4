//! Distance conversions for redshifts and direct distance measurements.

pub const H0: f64 = 70.0;
pub const OMEGA_M: f64 = 0.3;
pub const OMEGA_LAMBDA: f64 = 0.7;

const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;
/// Mpc per arcsec expressed as kpc: 1 rad = 206264.806 arcsec.
const MPC_TO_KPC_PER_ARCSEC: f64 = 206.264_806;
const INTEGRATION_STEPS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEstimate {
    pub z: Option<f64>,
    pub distance_mpc: f64,
    pub distance_modulus: f64,
    pub scale_kpc_per_arcsec: f64,
}

/// Luminosity distance, distance modulus and angular scale for a redshift in
/// a FLRW cosmology (radiation included, curvature from the closure relation).
pub fn redshift_to_distance(z: f64, omega_m: f64, omega_lambda: f64, h0: f64) -> DistanceEstimate {
    let h = h0 / 100.0;
    let omega_r = 4.165e-5 / (h * h);
    let omega_k = 1.0 - omega_m - omega_r - omega_lambda;
    let az = 1.0 / (1.0 + z);

    let mut comoving = 0.0;
    for i in 0..INTEGRATION_STEPS {
        let a = az + (1.0 - az) * (i as f64 + 0.5) / INTEGRATION_STEPS as f64;
        let adot = (omega_k + omega_m / a + omega_r / (a * a) + omega_lambda * a * a).sqrt();
        comoving += 1.0 / (a * adot);
    }
    comoving *= (1.0 - az) / INTEGRATION_STEPS as f64;

    let x = omega_k.abs().sqrt() * comoving;
    let ratio = if x > 0.1 {
        if omega_k > 0.0 {
            0.5 * (x.exp() - (-x).exp()) / x
        } else {
            x.sin() / x
        }
    } else {
        let mut y = x * x;
        if omega_k < 0.0 {
            y = -y;
        }
        1.0 + y / 6.0 + y * y / 120.0
    };

    let transverse = ratio * comoving;
    let angular_diameter = az * transverse;
    let hubble_distance = SPEED_OF_LIGHT_KMS / h0;
    let angular_diameter_mpc = hubble_distance * angular_diameter;
    let luminosity_mpc = hubble_distance * angular_diameter / (az * az);

    DistanceEstimate {
        z: Some(z),
        distance_mpc: luminosity_mpc,
        distance_modulus: distance_modulus(luminosity_mpc),
        scale_kpc_per_arcsec: angular_diameter_mpc / MPC_TO_KPC_PER_ARCSEC,
    }
}

/// Same conversion with the fixed cosmology used for every catalogue.
pub fn standard_redshift_distance(z: f64) -> DistanceEstimate {
    redshift_to_distance(z, OMEGA_M, OMEGA_LAMBDA, H0)
}

/// Direct distances use a flat-sky, small-angle scale.
pub fn direct_distance(distance_mpc: f64) -> DistanceEstimate {
    DistanceEstimate {
        z: None,
        distance_mpc,
        distance_modulus: distance_modulus(distance_mpc),
        scale_kpc_per_arcsec: distance_mpc / MPC_TO_KPC_PER_ARCSEC,
    }
}

pub fn distance_modulus(distance_mpc: f64) -> f64 {
    5.0 * (distance_mpc * 1e6).log10() - 5.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn matches_reference_cosmology() {
        let low = standard_redshift_distance(0.01);
        assert!(close(low.distance_mpc, 43.158, 0.01));
        assert!(close(low.distance_modulus, 33.175, 0.001));
        assert!(close(low.scale_kpc_per_arcsec, 0.2051, 0.0001));

        let mid = standard_redshift_distance(0.1);
        assert!(close(mid.distance_mpc, 460.30, 0.05));
        assert!(close(mid.distance_modulus, 38.315, 0.001));
        assert!(close(mid.scale_kpc_per_arcsec, 1.8443, 0.0005));

        let high = standard_redshift_distance(0.5);
        assert!(close(high.distance_mpc, 2832.85, 0.5));
        assert!(close(high.scale_kpc_per_arcsec, 6.104, 0.001));
    }

    #[test]
    fn direct_distance_uses_flat_scale() {
        let estimate = direct_distance(20.6264806);
        assert!(close(estimate.scale_kpc_per_arcsec, 0.1, 1e-9));
        assert!(close(direct_distance(10.0).distance_modulus, 30.0, 1e-9));
        assert_eq!(estimate.z, None);
    }
}
