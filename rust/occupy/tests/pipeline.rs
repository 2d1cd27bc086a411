use std::path::{
    Path,
    PathBuf,
};
use std::sync::atomic::AtomicBool;

use occupy::mrc::{
    read_mrc,
    write_mrc,
};
use occupy::volume::Volume;
use occupy::{
    OccupyConfig,
    ScaleMode,
    run,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{
    Distribution,
    Normal,
};

fn work_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("occupy_pipeline_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Noisy `n`³ map with a bright central ball and a dimmer shell around it.
fn write_test_map(dir: &Path, n: usize) -> PathBuf {
    let mut rng = StdRng::seed_from_u64(2024);
    let normal = Normal::new(0.0f32, 0.2).unwrap();
    let center = (n as f32 - 1.0) / 2.0;
    let map = Volume::from_fn(n, 1.0, |x, y, z| {
        let r = [x, y, z]
            .iter()
            .map(|&c| (c as f32 - center).powi(2))
            .sum::<f32>()
            .sqrt();
        let signal = if r < 5.0 {
            4.0
        } else if r < 8.0 {
            1.5
        } else {
            0.0
        };
        signal + normal.sample(&mut rng)
    });
    write_mrc(dir.join("map.mrc"), &map, None).unwrap()
}

#[test]
fn test_modify_all_modes_with_downscaling() {
    let dir = work_dir("modes");
    let input = write_test_map(&dir, 64);
    let config = OccupyConfig {
        input_map: Some(input.clone()),
        output_dir: dir.clone(),
        amplify: Some(2.0),
        attenuate: Some(2.0),
        sigmoid: Some(2.0),
        pivot: Some(0.3),
        tile_size: 4,
        max_box: 32,
        save_all_maps: true,
        chimerax: true,
        plot: true,
        seed: Some(1),
        ..Default::default()
    };
    let output = run(&config, &AtomicBool::new(false)).unwrap();

    assert_eq!(output.settings.input_size, 64);
    assert_eq!(output.settings.processing_size, 32);
    assert_eq!(output.settings.processing_voxel_size, 2.0);
    assert_eq!(output.settings.kernel_size, 5);
    assert!(output.full_scale > 0.0);

    let names: Vec<String> = output
        .modified_maps
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(
        names,
        vec!["ampl_2.0_map.mrc", "attn_2.0_map.mrc", "sigm_2.0-0.30_map.mrc"]
    );
    assert!(output.solvent_excluded_map.is_none());
    assert_eq!(output.intermediate_maps.len(), 5);
    assert!(output.scale_map.ends_with("scale_occ_map.mrc"));
    assert!(output.confidence_map.ends_with("conf_map.mrc"));

    let original = read_mrc(&input).unwrap().volume;
    let (lo, hi) = original.range();
    for path in &output.modified_maps {
        let map = read_mrc(path).unwrap();
        assert_eq!(map.volume.n(), 64);
        assert!((map.volume.voxel_size() - 1.0).abs() < 1e-5);
        assert!(map.volume.data().iter().all(|&v| v >= lo && v <= hi));
    }

    let scale = read_mrc(&output.scale_map).unwrap();
    assert_eq!(scale.volume.n(), 32);
    assert!((scale.volume.voxel_size() - 2.0).abs() < 1e-5);
    assert!(scale.volume.data().iter().all(|s| (0.0..=1.0).contains(s)));
    let confidence = read_mrc(&output.confidence_map).unwrap();
    assert!(confidence.volume.data().iter().all(|c| (0.0..=1.0).contains(c)));

    assert_eq!(output.chimerax_scripts.len(), 1);
    let script = std::fs::read_to_string(&output.chimerax_scripts[0]).unwrap();
    assert!(script.contains("sigm_2.0-0.30_map.mrc"));
    assert!(script.contains("show_max_tile"));

    let log = std::fs::read_to_string(&output.log).unwrap();
    assert!(log.contains("Full scale"));
    assert!(output.diagnostics.as_ref().is_some_and(|p| p.exists()));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_solvent_exclusion_only() {
    let dir = work_dir("exclusion");
    let input = write_test_map(&dir, 32);
    // Marks the content; the solvent side has the smaller variance.
    let definition = Volume::from_fn(32, 1.0, |x, y, z| {
        let r2 = [x, y, z]
            .iter()
            .map(|&c| (c as f32 - 15.5).powi(2))
            .sum::<f32>();
        if r2 < 81.0 { 1.0 } else { 0.0 }
    });
    let solvent_def = write_mrc(dir.join("mask.mrc"), &definition, None).unwrap();
    let config = OccupyConfig {
        input_map: Some(input),
        output_dir: dir.clone(),
        solvent_def: Some(solvent_def),
        exclude_solvent: true,
        naive_normalization: true,
        scale_mode: ScaleMode::Resolution,
        chimerax_silent: true,
        ..Default::default()
    };
    let output = run(&config, &AtomicBool::new(false)).unwrap();

    assert!(output.modified_maps.is_empty());
    let excluded = output.solvent_excluded_map.as_ref().unwrap();
    assert!(excluded.ends_with("solExcl_map.mrc"));
    assert_eq!(read_mrc(excluded).unwrap().volume.n(), 32);
    assert!(output.scale_map.ends_with("scale_naive_res_map.mrc"));
    assert!(output.intermediate_maps.is_empty());
    assert!(output.diagnostics.is_none());
    assert_eq!(output.chimerax_scripts.len(), 1);
    assert!(output.chimerax_scripts[0].ends_with("chimX_map_silent.cxc"));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_odd_input_rejected() {
    let dir = work_dir("odd");
    let input = dir.join("odd.mrc");
    let mut header = occupy::MrcHeader::for_volume(&Volume::zeros(9, 1.0));
    header.add_label("odd");
    occupy::MrcMap {
        volume: Volume::zeros(9, 1.0),
        header,
    }
    .write(&input)
    .unwrap();
    let config = OccupyConfig {
        input_map: Some(input),
        output_dir: dir.clone(),
        ..Default::default()
    };
    assert!(matches!(
        run(&config, &AtomicBool::new(false)),
        Err(occupy::OccupyError::InputShape { .. })
    ));
    std::fs::remove_dir_all(&dir).ok();
}
