use std::path::{Path, PathBuf};

use csv::WriterBuilder;

use super::error::ExperimentError;
use super::point::Point;
use super::spectrum::ImpedanceData;

fn write_echem(path: &Path, t: &[f64], v: &[f64], i: &[f64]) -> Result<(), ExperimentError> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(["t/s", "V/V", "I/A"])?;
    for ((t, v), i) in t.iter().zip(v).zip(i) {
        writer.write_record(&[t.to_string(), v.to_string(), i.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_impedance(path: &Path, data: &ImpedanceData) -> Result<(), ExperimentError> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(["f/Hz", "Re(Z)/Ohm", "Im(Z)/Ohm"])?;
    for (f, z) in data.freqs.iter().zip(&data.z) {
        writer.write_record(&[f.to_string(), z.re.to_string(), z.im.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one point as text files into `folder`; returns the files written.
///
/// `stem` is the file-name prefix (`ii_jj` or `ii_jj_k`). Spectra with a
/// derived layer get an extra `_Impedance` file.
pub(crate) fn export_point(
    folder: &Path,
    stem: &str,
    point: &Point,
) -> Result<Vec<PathBuf>, ExperimentError> {
    let mut written = Vec::new();
    match point {
        Point::Empty(_) => {}
        Point::Composite(composite) => {
            for (k, child) in composite.children.iter().enumerate() {
                written.extend(export_point(folder, &format!("{}_{}", stem, k), child)?);
            }
        }
        _ => {
            if let Some((t, v, i)) = point.echem_data() {
                let path = folder.join(format!("{}_{}.asc", stem, point.kind_name()));
                write_echem(&path, t, v, i)?;
                written.push(path);
            }
            if let Point::Spectrum(spectrum) = point {
                if let Some(data) = &spectrum.impedance {
                    let path = folder.join(format!("{}_Impedance.asc", stem));
                    write_impedance(&path, data)?;
                    written.push(path);
                }
            }
        }
    }
    Ok(written)
}
