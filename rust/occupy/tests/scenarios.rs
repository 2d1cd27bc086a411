use occupy::diagnostics::DiagnosticsSink;
use occupy::modify::{
    ModificationMode,
    modify,
};
use occupy::mrc::{
    read_mrc,
    write_mrc,
};
use occupy::radial_mask::radial_mask;
use occupy::scale::{
    NormalizationMode,
    TilePolicy,
    TileSettings,
    estimate,
    spherical_kernel,
};
use occupy::solvent::{
    SolventComponents,
    fit_solvent_to_histogram,
    suppress,
};
use occupy::volume::Volume;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{
    Distribution,
    Normal,
};

const CUBE: std::ops::Range<usize> = 12..20;

/// 32³ unit Gaussian noise with a central 8³ cube at 10.
fn noise_with_cube(seed: u64) -> Volume {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    let mut v = Volume::from_fn(32, 1.0, |_, _, _| normal.sample(&mut rng));
    for z in CUBE {
        for y in CUBE {
            for x in CUBE {
                v.set(x, y, z, 10.0);
            }
        }
    }
    v
}

/// Chebyshev distance from voxel (x, y, z) to the cube.
fn distance_to_cube(x: usize, y: usize, z: usize) -> usize {
    [x, y, z]
        .iter()
        .map(|&c| {
            if c < CUBE.start {
                CUBE.start - c
            } else if c >= CUBE.end {
                c + 1 - CUBE.end
            } else {
                0
            }
        })
        .max()
        .unwrap()
}

#[test]
fn test_solvent_fit_outside_sphere() {
    let v = noise_with_cube(42);
    let sphere = radial_mask(32, 3, None, Some(15.0)).unwrap();
    let sample: Vec<f32> = v
        .data()
        .iter()
        .zip(sphere.values())
        .filter(|(_, inside)| !**inside)
        .map(|(&d, _)| d)
        .collect();
    assert!(sample.len() > 15_000);

    let fit = fit_solvent_to_histogram(
        &sample,
        200,
        SolventComponents::One,
        &mut DiagnosticsSink::disabled(),
    )
    .unwrap();
    let solvent = fit.params.solvent();
    assert!(solvent.mean.abs() < 0.1, "{:?}", solvent);
    assert!((solvent.sigma - 1.0).abs() < 0.2, "{:?}", solvent);
    // Content at 1% of solvent lies in the upper tail, below the solvent edge.
    assert!(fit.limits.mid_high() > solvent.mean + solvent.sigma);
    assert!(fit.limits.high() >= fit.limits.mid_high());
}

#[test]
fn test_scale_of_cube_in_noise() {
    let v = noise_with_cube(7);
    let (kernel, tau) = spherical_kernel(5, Some(2.0)).unwrap();
    let settings = TileSettings {
        n_tiles: 20,
        tile_size: Some(4),
        policy: TilePolicy::Sphere,
    };
    let field = estimate(&v, &kernel, tau, &settings, NormalizationMode::Tiled).unwrap();
    assert_eq!(field.full_scale, 10.0);

    let scale = &field.scale;
    assert!(scale.data().iter().all(|s| s.is_finite() && (0.0..=1.0).contains(s)));
    let mut far = Vec::new();
    for z in 0..32 {
        for y in 0..32 {
            for x in 0..32 {
                let d = distance_to_cube(x, y, z);
                if d == 0 {
                    assert_eq!(scale.get(x, y, z), 1.0);
                } else if d > 3 {
                    far.push(scale.get(x, y, z) as f64);
                }
            }
        }
    }
    let mean = far.iter().sum::<f64>() / far.len() as f64;
    assert!(mean < 0.3, "mean scale away from the cube {}", mean);
}

#[test]
fn test_attenuate_constant_half_scale() {
    let data = Volume::from_fn(8, 1.0, |x, y, z| 1.0 + (x + 2 * y + 3 * z) as f32);
    let scale = Volume::from_fn(8, 1.0, |_, _, _| 0.5);
    let mode = ModificationMode::Attenuate { power: 2.0 };
    let out = modify(&data, &scale, &mode, 0.05, None, &mut DiagnosticsSink::disabled()).unwrap();
    for (o, d) in out.map.data().iter().zip(data.data()) {
        assert!((o - d * 0.5).abs() < 1e-5);
    }
    assert!(out.modification.data().iter().all(|m| (m - 0.5).abs() < 1e-7));
}

#[test]
fn test_full_scale_untouched() {
    let data = noise_with_cube(3);
    let ones = data.map(|_| 1.0);
    for power in [1.5, 2.0, 10.0] {
        let mode = ModificationMode::Amplify { power };
        let out = modify(&data, &ones, &mode, 0.05, None, &mut DiagnosticsSink::disabled()).unwrap();
        assert_eq!(out.map.data(), data.data());
    }
}

#[test]
fn test_zero_confidence_keeps_original() {
    let original = noise_with_cube(11);
    let modified = original.map(|v| 3.0 * v - 1.0);
    let zeros = original.map(|_| 0.0);
    let out = suppress(&modified, &original, &zeros, false).unwrap();
    assert_eq!(out.data(), original.data());

    let excluded = suppress(&modified, &original, &zeros, true).unwrap();
    assert!(excluded.data().iter().all(|&v| v == 0.0));
}

#[test]
fn test_mrc_round_trip() {
    let v = noise_with_cube(5);
    let mut v = v.map(|x| x * 0.37);
    v.set_voxel_size(1.234);
    let path = std::env::temp_dir().join(format!("occupy_scenario_{}.mrc", std::process::id()));
    let written = write_mrc(&path, &v, Some("round trip")).unwrap();
    let map = read_mrc(&written).unwrap();
    assert_eq!(map.volume.n(), 32);
    assert!((map.volume.voxel_size() - 1.234).abs() < 1e-6);
    assert_eq!(map.volume.data(), v.data());
    std::fs::remove_file(&written).ok();
}
