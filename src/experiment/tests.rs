use super::*;
use num_complex::Complex64;
use std::f64::consts::PI;
use tempfile::tempdir;

fn plan_3x3() -> Vec<ScanPoint> {
    let mut plan = Vec::new();
    for j in 0..3 {
        for i in 0..3 {
            plan.push(ScanPoint {
                i,
                j,
                x: 15.0 * i as f64,
                y: 15.0 * j as f64,
            });
        }
    }
    plan
}

fn triangle_cv(loc: Location) -> Voltammogram {
    // 0 -> 0.5 -> -0.5 -> 0 at 1 V/s, 100 samples per second
    let n = 200;
    let t: Vec<f64> = (0..n).map(|k| k as f64 * 0.01).collect();
    let v: Vec<f64> = t
        .iter()
        .map(|&t| {
            if t < 0.5 {
                t
            } else if t < 1.5 {
                1.0 - t
            } else {
                t - 2.0
            }
        })
        .collect();
    // anodic peak at +0.3 V, cathodic peak at -0.1 V
    let i: Vec<f64> = v
        .iter()
        .zip(&t)
        .map(|(&v, &t)| {
            if t < 0.5 {
                1e-9 * (-(v - 0.3f64).powi(2) / 0.002).exp()
            } else {
                -1e-9 * (-(v + 0.1f64).powi(2) / 0.002).exp()
            }
        })
        .collect();
    Voltammogram::new(loc, t, v, i).unwrap()
}

fn synthetic_spectrum(z_true: &[Complex64], freqs: &[f64], distortion: &[CorrectionEntry]) -> Spectrum {
    let fs = 10_000.0;
    let n = 10_000;
    let t: Vec<f64> = (0..n).map(|k| k as f64 / fs).collect();
    let mut v = vec![0.0; n];
    let mut i = vec![0.0; n];
    for (idx, &f) in freqs.iter().enumerate() {
        let amp = 0.01;
        let measured = z_true[idx]
            * Complex64::from_polar(distortion[idx].magnitude, distortion[idx].phase_deg.to_radians());
        for k in 0..n {
            let phase = 2.0 * PI * f * t[k];
            v[k] += amp * phase.sin();
            i[k] += amp / measured.norm() * (phase - measured.arg()).sin();
        }
    }
    Spectrum::new(Location::default(), t, v, i, freqs.to_vec()).unwrap()
}

#[test]
fn test_new_fills_placeholders() {
    let exp = Experiment::new(30.0, 3, &plan_3x3()).unwrap();
    assert_eq!(exp.points.len(), 9);
    assert_eq!(exp.order.len(), 9);
    assert_eq!(exp.non_empty_count(), 0);
    let p = exp.get_datapoint((2, 1)).unwrap();
    assert!(p.is_empty());
    assert_eq!(p.loc(), Location::new(30.0, 15.0, 0.0));
}

#[test]
fn test_new_rejects_duplicate_cells() {
    let mut plan = plan_3x3();
    plan[1] = plan[0];
    assert!(matches!(
        Experiment::new(30.0, 3, &plan),
        Err(ExperimentError::InvalidData(_))
    ));
}

#[test]
fn test_set_datapoint_transposes() {
    let mut exp = Experiment::new(30.0, 3, &plan_3x3()).unwrap();
    let cv = triangle_cv(Location::new(30.0, 0.0, 2.0));
    exp.set_datapoint((2, 0), cv.into()).unwrap();
    assert!(!exp.grid()[0][2].is_empty());
    assert!(exp.grid()[2][0].is_empty());
    assert!(!exp.is_saved());

    let err = exp.set_datapoint((3, 0), Point::default()).unwrap_err();
    assert!(matches!(err, ExperimentError::OutOfBounds { i: 3, j: 0, size: 3 }));
    assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameters);
}

#[test]
fn test_voltammogram_requires_increasing_time() {
    let err = Voltammogram::new(
        Location::default(),
        vec![0.0, 1.0, 1.0],
        vec![0.0; 3],
        vec![0.0; 3],
    )
    .unwrap_err();
    assert!(matches!(err, ExperimentError::InvalidData(_)));
    assert!(Voltammogram::new(Location::default(), vec![0.0], vec![], vec![0.0]).is_err());
}

#[test]
fn test_heatmap_kinds() {
    let mut exp = Experiment::new(30.0, 3, &plan_3x3()).unwrap();
    let cv = Voltammogram::new(
        Location::new(0.0, 0.0, 4.5),
        vec![0.0, 1.0, 2.0, 3.0],
        vec![-0.2, 0.0, 0.2, 0.4],
        vec![1.0, -5.0, 2.0, 6.0],
    )
    .unwrap();
    exp.set_datapoint((0, 0), cv.into()).unwrap();

    let value = |kind: HeatmapKind| exp.get_heatmap_data(&kind, None)[0][0];
    assert_eq!(value(HeatmapKind::MaxCurrent), 6.0);
    assert_eq!(value(HeatmapKind::AverageCurrent), 1.0);
    assert_eq!(value(HeatmapKind::CurrentAtVoltage(0.19)), 2.0);
    assert_eq!(value(HeatmapKind::CurrentAtTime(1.2)), -5.0);
    assert_eq!(value(HeatmapKind::ZHeight), 4.5);
    assert_eq!(exp.get_heatmap_data(&HeatmapKind::MaxCurrent, None)[1][1], 0.0);
}

#[test]
fn test_heatmap_kind_parsing() {
    assert_eq!("max".parse::<HeatmapKind>().unwrap(), HeatmapKind::MaxCurrent);
    assert_eq!(
        " voltage: 0.25 ".parse::<HeatmapKind>().unwrap(),
        HeatmapKind::CurrentAtVoltage(0.25)
    );
    assert_eq!(
        "analysis:peak_current".parse::<HeatmapKind>().unwrap(),
        HeatmapKind::Analysis("peak_current".to_string())
    );
    assert!("time".parse::<HeatmapKind>().is_err());
    assert!("colour".parse::<HeatmapKind>().is_err());
}

#[test]
fn test_nearest_datapoint_tie_breaks_row_major() {
    let exp = Experiment::new(30.0, 3, &plan_3x3()).unwrap();
    let ((i, j), _) = exp.get_nearest_datapoint(7.5, 0.0).unwrap();
    assert_eq!((i, j), (0, 0));
    let ((i, j), _) = exp.get_nearest_datapoint(29.0, 16.0).unwrap();
    assert_eq!((i, j), (2, 1));
}

#[test]
fn test_composite_queries() {
    let loc = Location::new(15.0, 15.0, 1.0);
    let cv = triangle_cv(loc);
    let spectrum = Spectrum::new(loc, vec![0.0, 0.1], vec![0.0, 0.0], vec![0.0, 7.0], vec![10.0]).unwrap();
    let composite = Composite::new(loc, vec![cv.clone().into(), spectrum.into()]);
    let point: Point = composite.into();

    assert_eq!(point.count(), 2);
    assert_eq!(point.kind_name(), "Composite");
    assert_eq!(point.echem_data().unwrap().0.len(), cv.len());
    assert_eq!(point.sub(1).unwrap().kind_name(), "Spectrum");
    assert_eq!(point.sub(1).unwrap().scalar(&HeatmapKind::MaxCurrent), 7.0);
    assert!(point.sub(2).is_none());
}

#[test]
fn test_do_analysis_memoizes_and_lifts() {
    let mut exp = Experiment::new(30.0, 3, &plan_3x3()).unwrap();
    let loc = Location::new(0.0, 0.0, 0.0);
    exp.set_datapoint((0, 0), triangle_cv(loc).into()).unwrap();
    let spectrum = Spectrum::new(loc, vec![0.0, 0.1], vec![0.0; 2], vec![0.0; 2], vec![10.0]).unwrap();
    exp.set_datapoint(
        (1, 0),
        Composite::new(loc, vec![spectrum.into(), triangle_cv(loc).into()]).into(),
    )
    .unwrap();
    exp.save_as(tempdir().unwrap().path().join("a")).unwrap();
    assert!(exp.is_saved());

    let e0 = exp.do_analysis(&FormalPotential);
    assert!((e0[0][0] - 0.1).abs() < 0.011, "E0 = {}", e0[0][0]);
    assert_eq!(e0[0][1], e0[0][0]);
    assert!(!exp.is_saved());

    match exp.get_datapoint((1, 0)).unwrap() {
        Point::Composite(c) => {
            assert!(c.analysis.contains_key("formal_potential"));
            assert!(c.children[1].analysis().unwrap().contains_key("formal_potential"));
        }
        other => panic!("expected composite, got {}", other.kind_name()),
    }

    let map = exp.get_heatmap_data(&HeatmapKind::Analysis("formal_potential".into()), None);
    assert_eq!(map[0][0], e0[0][0]);
}

#[test]
fn test_max_points_per_loc() {
    let mut exp = Experiment::new(30.0, 3, &plan_3x3()).unwrap();
    assert_eq!(exp.max_points_per_loc(), 0);
    let loc = Location::default();
    let children = (0..3).map(|_| triangle_cv(loc).into()).collect();
    exp.set_datapoint((1, 1), Composite::new(loc, children).into()).unwrap();
    exp.set_datapoint((0, 1), triangle_cv(loc).into()).unwrap();
    assert_eq!(exp.max_points_per_loc(), 3);
}

#[test]
fn test_container_roundtrip() {
    let dir = tempdir().unwrap();
    let mut exp = Experiment::new(30.0, 3, &plan_3x3()).unwrap();
    exp.set_datapoint((1, 2), triangle_cv(Location::new(15.0, 30.0, 3.0)).into())
        .unwrap();
    let mut settings = Settings::new();
    settings.set("cv.scan_rate", "0.1");
    settings.set("eis.amplitude", "20");
    exp.set_settings(settings);

    exp.save_as(dir.path().join("scan")).unwrap();
    let path = exp.path().unwrap().to_path_buf();
    assert_eq!(path.extension().unwrap(), SECM_EXTENSION);

    let loaded = Experiment::load(&path).unwrap();
    assert!(loaded.is_saved());
    assert_eq!(loaded.id, exp.id);
    assert_eq!(loaded.order, exp.order);
    assert_eq!(loaded.settings().get("cv.scan_rate"), Some("0.1"));
    assert_eq!(loaded.get_datapoint((1, 2)), exp.get_datapoint((1, 2)));
    assert_eq!(loaded.non_empty_count(), 1);
}

#[test]
fn test_container_rejects_foreign_zip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("other.secmdata");
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("mimetype", zip::write::SimpleFileOptions::default())
        .unwrap();
    std::io::Write::write_all(&mut zip, b"application/zip").unwrap();
    zip.finish().unwrap();

    assert!(matches!(
        Experiment::load(&path),
        Err(ExperimentError::InvalidFormat(_))
    ));
}

#[test]
fn test_save_to_folder_names() {
    let dir = tempdir().unwrap();
    let mut exp = Experiment::new(30.0, 3, &plan_3x3()).unwrap();
    let loc = Location::default();
    exp.set_datapoint((0, 2), triangle_cv(loc).into()).unwrap();
    let mut spectrum = synthetic_spectrum(
        &[Complex64::new(1e6, 0.0)],
        &[10.0],
        &[CorrectionEntry { freq: 10.0, magnitude: 1.0, phase_deg: 0.0 }],
    );
    spectrum.finalize(None).unwrap();
    exp.set_datapoint(
        (1, 2),
        Composite::new(loc, vec![triangle_cv(loc).into(), spectrum.into()]).into(),
    )
    .unwrap();

    let written = exp.save_to_folder(dir.path().join("out")).unwrap();
    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "00_02_Voltammogram.asc",
            "01_02_0_Voltammogram.asc",
            "01_02_1_Spectrum.asc",
            "01_02_1_Impedance.asc",
        ]
    );
    let text = std::fs::read_to_string(&written[0]).unwrap();
    assert!(text.starts_with("t/s,V/V,I/A"));
    assert_eq!(text.lines().count(), 201);
}

#[test]
fn test_settings_paths() {
    let mut settings = Settings::new();
    settings.set("amp.gain", "3");
    settings.set("amp.filter.kind", "bessel");
    settings.set("note", "hello");
    assert_eq!(settings.get("amp.filter.kind"), Some("bessel"));
    assert_eq!(settings.get("amp"), None);
    assert!(settings.group("amp.filter").is_some());
    settings.set("note.sub", "x");
    assert_eq!(settings.get("note"), None);
    assert_eq!(
        settings.flatten(),
        vec![
            ("amp.filter.kind".to_string(), "bessel".to_string()),
            ("amp.gain".to_string(), "3".to_string()),
            ("note.sub".to_string(), "x".to_string()),
        ]
    );
}

#[test]
fn test_stream_buffer_reset_times_and_convert() {
    let mut buffer = StreamBuffer::with_gain(1e-9);
    buffer.extend(&[0.0, 0.1, 0.1], &[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]);
    buffer.extend(&[0.35, 0.4], &[0.1, 0.1], &[4.0, 5.0]);
    buffer.reset_times();
    assert_eq!(buffer.t, vec![0.0, 0.1, 0.2, 0.30000000000000004, 0.4]);
    let last = buffer.last_currents(2);
    assert_eq!(last.len(), 2);
    assert!((last[0] - 4e-9).abs() < 1e-20 && (last[1] - 5e-9).abs() < 1e-20);
    assert!((buffer.mean_current(0.15).unwrap() - 4.5e-9).abs() < 1e-20);

    let cv = buffer.into_voltammogram().unwrap();
    assert!((cv.i[2] - 3e-9).abs() < 1e-20);
    assert_eq!(cv.gain, 1e-9);
}

#[test]
fn test_spectrum_finalize_is_idempotent() {
    let freqs = [10.0, 30.0, 70.0];
    let z = [
        Complex64::new(1e6, -2e5),
        Complex64::new(8e5, -3e5),
        Complex64::new(5e5, -4e5),
    ];
    let corrections: Vec<CorrectionEntry> = freqs
        .iter()
        .map(|&f| CorrectionEntry { freq: f, magnitude: 1.2, phase_deg: -5.0 })
        .collect();
    let mut spectrum = synthetic_spectrum(&z, &freqs, &corrections);
    let first = spectrum.finalize(Some(&corrections)).unwrap().clone();
    let second = spectrum.finalize(Some(&corrections)).unwrap().clone();
    assert_eq!(first, second);
    for (f, expected) in first.freqs.iter().zip(freqs) {
        assert!((f - expected).abs() < 1e-6);
    }
}

#[test]
fn test_corrections_recover_true_impedance() {
    let freqs = [10.0, 40.0, 150.0, 700.0];
    let z_true = [
        Complex64::new(2e6, -1e6),
        Complex64::new(1.5e6, -4e5),
        Complex64::new(1e6, 1e5),
        Complex64::new(3e5, -2e5),
    ];
    let distortion = [
        CorrectionEntry { freq: 10.0, magnitude: 1.0, phase_deg: -0.5 },
        CorrectionEntry { freq: 40.0, magnitude: 0.98, phase_deg: -2.0 },
        CorrectionEntry { freq: 150.0, magnitude: 0.9, phase_deg: -8.0 },
        CorrectionEntry { freq: 700.0, magnitude: 0.7, phase_deg: -30.0 },
    ];
    let mut spectrum = synthetic_spectrum(&z_true, &freqs, &distortion);

    let raw = spectrum.finalize(None).unwrap().clone();
    assert!((raw.z[3] - z_true[3]).norm() / z_true[3].norm() > 0.1);

    let corrected = spectrum.finalize(Some(&distortion)).unwrap();
    for (z, expected) in corrected.z.iter().zip(&z_true) {
        assert!((z - expected).norm() / expected.norm() < 1e-6, "{} vs {}", z, expected);
    }
}

#[test]
fn test_correction_entry_from_reference() {
    let measured = Complex64::from_polar(9e6, (-10.0f64).to_radians());
    let entry = CorrectionEntry::from_reference(100.0, measured, 10e6);
    assert!((entry.magnitude - 0.9).abs() < 1e-12);
    assert!((entry.phase_deg + 10.0).abs() < 1e-9);
    let fixed = entry.apply(measured);
    assert!((fixed - Complex64::new(10e6, 0.0)).norm() < 1e-3);
}

#[test]
fn test_dead_current_channel_is_degenerate() {
    let t: Vec<f64> = (0..64).map(|k| k as f64 * 1e-3).collect();
    let v: Vec<f64> = t.iter().map(|t| 0.01 * (2.0 * PI * 125.0 * t).sin()).collect();
    let mut spectrum = Spectrum::new(Location::default(), t, v, vec![0.0; 64], vec![125.0]).unwrap();

    let err = spectrum.finalize(None).unwrap_err();
    assert!(matches!(err, ExperimentError::DegenerateSignal(_)));
    assert_eq!(err.kind(), crate::error::ErrorKind::MeasurementFailed);
    assert!(spectrum.impedance.is_none());
}

#[test]
fn test_derive_rejects_unusable_time_axis() {
    let v = [0.0, 1.0, 0.0];
    let i = [0.0, 1.0, 0.0];
    assert!(matches!(
        derive_impedance(&[1.0, 1.0, 1.0], &v, &i, &[10.0], None),
        Err(ExperimentError::InvalidData(_))
    ));
    assert!(matches!(
        derive_impedance(&[0.0, 1.0, f64::INFINITY], &v, &i, &[10.0], None),
        Err(ExperimentError::InvalidData(_))
    ));
}

#[test]
fn test_container_keeps_non_finite_values() {
    let dir = tempdir().unwrap();
    let mut exp = Experiment::new(30.0, 3, &plan_3x3()).unwrap();

    let t: Vec<f64> = (0..64).map(|k| k as f64 * 1e-3).collect();
    let dead = Spectrum::new(Location::default(), t.clone(), t.clone(), vec![0.0; 64], vec![125.0])
        .unwrap();
    exp.set_datapoint((1, 2), dead.into()).unwrap();

    let mut cv = triangle_cv(Location::new(0.0, 30.0, 2.0));
    cv.i[3] = f64::NAN;
    cv.analysis.insert("ratio".to_string(), f64::INFINITY);
    exp.set_datapoint((0, 2), cv.into()).unwrap();

    exp.save_as(dir.path().join("nan")).unwrap();
    let loaded = Experiment::load(exp.path().unwrap()).unwrap();

    let Some(Point::Voltammogram(cv)) = loaded.get_datapoint((0, 2)) else {
        panic!("expected a voltammogram at (0, 2)");
    };
    assert!(cv.i[3].is_nan());
    assert_eq!(cv.analysis["ratio"], f64::INFINITY);
    let Some(Point::Spectrum(dead)) = loaded.get_datapoint((1, 2)) else {
        panic!("expected a spectrum at (1, 2)");
    };
    assert!(dead.impedance.is_none());
    assert_eq!(dead.i, vec![0.0; 64]);
}

#[test]
fn test_charge_and_peak() {
    let t = [0.0, 1.0, 2.0];
    let i = [1.0, 1.0, -3.0];
    assert_eq!(ChargePassed.compute(&t, &[0.0; 3], &i), 0.0);
    assert_eq!(PeakCurrent.compute(&t, &[0.0; 3], &i), -3.0);
    assert_eq!(estimate_formal_potential(&[0.1, 0.2], &[1.0, 2.0]), None);
    assert!(builtin_analysis("charge_passed").is_some());
    assert!(builtin_analysis("unknown").is_none());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn impedance_derivation_is_idempotent(re in 1e3f64..1e7, im in -1e7f64..1e7, phase in -45.0f64..45.0) {
            let freqs = [20.0, 50.0];
            let z = [Complex64::new(re, im), Complex64::new(re, im / 2.0)];
            let corr: Vec<CorrectionEntry> = freqs.iter()
                .map(|&f| CorrectionEntry { freq: f, magnitude: 1.1, phase_deg: phase })
                .collect();
            let mut spectrum = synthetic_spectrum(&z, &freqs, &corr);
            let a = spectrum.finalize(Some(&corr)).unwrap().z.clone();
            let b = spectrum.finalize(Some(&corr)).unwrap().z.clone();
            prop_assert_eq!(a, b);
        }
    }
}
