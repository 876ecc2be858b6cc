//! Integration tests for the .secmdata ZIP container
//!
//! These tests verify:
//! 1. MimeType compliance (first entry, uncompressed)
//! 2. Composite pixels keep their impedance layer and analysis memos
//! 3. Re-saving replaces the file in place without leftovers

use num_complex::Complex64;
use secm::experiment::{
    Composite, Experiment, FormalPotential, HeatmapKind, Location, PeakCurrent, Point, ScanPoint,
    Settings, Spectrum, Voltammogram, SECM_EXTENSION, SECM_MIMETYPE,
};
use std::f64::consts::PI;
use std::fs::File;
use std::io::Read;
use tempfile::tempdir;
use zip::{CompressionMethod, ZipArchive};

fn plan(n: usize, length: f64) -> Vec<ScanPoint> {
    let step = length / (n - 1) as f64;
    let mut plan = Vec::new();
    for j in (0..n).rev() {
        for i in 0..n {
            plan.push(ScanPoint {
                i,
                j,
                x: step * i as f64,
                y: step * j as f64,
            });
        }
    }
    plan
}

/// Sweep 0 -> 0.4 -> -0.4 with an oxidation peak at `e0 + 0.05` and a
/// reduction peak at `e0 - 0.05`.
fn cv(loc: Location, e0: f64) -> Voltammogram {
    let t: Vec<f64> = (0..160).map(|k| k as f64 * 0.01).collect();
    let v: Vec<f64> = t
        .iter()
        .map(|&t| if t < 0.4 { t } else { 0.8 - t })
        .collect();
    let i: Vec<f64> = v
        .iter()
        .zip(&t)
        .map(|(&v, &t)| {
            let sign = if t < 0.4 { 1.0 } else { -1.0 };
            let peak = if t < 0.4 { e0 + 0.05 } else { e0 - 0.05 };
            sign * 1e-9 * (-(v - peak).powi(2) / 0.001).exp()
        })
        .collect();
    Voltammogram::new(loc, t, v, i).unwrap()
}

/// Response of a 1 MΩ resistor to a two-tone perturbation.
fn resistor(loc: Location) -> Spectrum {
    let fs = 5000.0;
    let freqs = vec![10.0, 100.0];
    let t: Vec<f64> = (0..5000).map(|k| k as f64 / fs).collect();
    let v: Vec<f64> = t
        .iter()
        .map(|&t| freqs.iter().map(|f| 0.01 * (2.0 * PI * f * t).sin()).sum())
        .collect();
    let i = v.iter().map(|v| v / 1e6).collect();
    Spectrum::new(loc, t, v, i, freqs).unwrap()
}

fn sample_experiment() -> Experiment {
    let mut exp = Experiment::new(20.0, 3, &plan(3, 20.0)).unwrap();
    for (k, (i, j)) in [(0, 2), (1, 2), (2, 2), (2, 1)].into_iter().enumerate() {
        let loc = Location::new(10.0 * i as f64, 10.0 * j as f64, 2.0 + k as f64 * 0.1);
        exp.set_datapoint((i, j), cv(loc, 0.1 * k as f64).into()).unwrap();
    }
    let loc = Location::new(10.0, 10.0, 2.5);
    let mut spectrum = resistor(loc);
    spectrum.finalize(None).unwrap();
    let composite = Composite::new(loc, vec![cv(loc, 0.2).into(), spectrum.into()]);
    exp.set_datapoint((1, 1), composite.into()).unwrap();

    let mut settings = Settings::new();
    settings.set("hopping.kind", "CV+EIS");
    settings.set("eis.f0", "10");
    exp.set_settings(settings);
    exp
}

#[test]
fn test_container_mimetype_layout() {
    let dir = tempdir().unwrap();
    let mut exp = sample_experiment();
    exp.save_as(dir.path().join("layout")).unwrap();
    let path = exp.path().unwrap().to_path_buf();
    assert_eq!(path.extension().unwrap(), SECM_EXTENSION);

    let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    assert!(names.contains(&"settings.json".to_string()));
    assert!(names.contains(&"experiment.json".to_string()));

    let mut first = archive.by_index(0).unwrap();
    assert_eq!(first.name(), "mimetype");
    assert_eq!(first.compression(), CompressionMethod::Stored);
    let mut mimetype = String::new();
    first.read_to_string(&mut mimetype).unwrap();
    assert_eq!(mimetype, SECM_MIMETYPE);
}

#[test]
fn test_composite_and_memos_survive_reload() {
    let dir = tempdir().unwrap();
    let mut exp = sample_experiment();
    let peaks = exp.do_analysis(&PeakCurrent);
    exp.do_analysis(&FormalPotential);
    assert!(!exp.is_saved());
    exp.save_as(dir.path().join("memo.secmdata")).unwrap();
    assert!(exp.is_saved());

    let loaded = Experiment::load(exp.path().unwrap()).unwrap();
    assert_eq!(loaded.non_empty_count(), 5);
    assert_eq!(loaded.max_points_per_loc(), 2);
    assert_eq!(loaded.settings().get("hopping.kind"), Some("CV+EIS"));

    let Some(Point::Composite(composite)) = loaded.get_datapoint((1, 1)) else {
        panic!("expected a composite at (1, 1)");
    };
    assert_eq!(composite.children.len(), 2);
    let Point::Spectrum(spectrum) = &composite.children[1] else {
        panic!("second member should be the spectrum");
    };
    let impedance = spectrum.impedance.as_ref().unwrap();
    for z in &impedance.z {
        assert!((z - Complex64::new(1e6, 0.0)).norm() < 1e3, "{}", z);
    }

    let memo = loaded.get_datapoint((1, 1)).unwrap().analysis().unwrap();
    assert!((memo["formal_potential"] - 0.2).abs() < 0.02);
    assert_eq!(
        loaded.get_heatmap_data(&HeatmapKind::Analysis("peak_current".to_string()), None),
        peaks
    );
    assert_eq!(loaded.get_heatmap_data(&HeatmapKind::ZHeight, None)[1][1], 2.5);
}

#[test]
fn test_resave_replaces_in_place() {
    let dir = tempdir().unwrap();
    let mut exp = sample_experiment();
    exp.save_as(dir.path().join("scan")).unwrap();
    let path = exp.path().unwrap().to_path_buf();

    let loc = Location::new(0.0, 0.0, 1.0);
    exp.set_datapoint((0, 0), cv(loc, 0.0).into()).unwrap();
    assert!(!exp.is_saved());
    assert_eq!(exp.save().unwrap(), path);

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(Experiment::load(&path).unwrap().non_empty_count(), 6);
}
