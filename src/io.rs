/*!
Checkpointing a mixture proposal to disk and back.

A mixture is written as a flat CSV table with one row per component:

- `component` — index within the mixture,
- `family` — `"gaussian"` or `"student_t"`,
- `weight` — the (normalized) mixture weight,
- `dof` — degrees of freedom, empty for the Gaussian family,
- `mean_0..mean_{d-1}` and `cov_{i}_{j}` — parameter values.

Values are written with Rust's shortest-round-trip float formatting, so a
save/load cycle reproduces the exact parameter bits; Cholesky factors are
recomputed deterministically on load. This makes checkpoint/resume across
process restarts reproduce identical sampling and density evaluation.
*/

use crate::densities::{Component, MvGaussian, MvStudentT};
use crate::errors::PmcError;
use crate::mixture::MixtureProposal;
use csv::{Reader, Writer};
use nalgebra::{DMatrix, DVector};
use std::fs::File;
use std::path::Path;

/// Saves a mixture proposal as a flat CSV record per component.
pub fn save_mixture<P: AsRef<Path>>(
    mixture: &MixtureProposal,
    filename: P,
) -> Result<(), PmcError> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    let dim = mixture.dim();

    let mut header: Vec<String> = vec![
        "component".to_string(),
        "family".to_string(),
        "weight".to_string(),
        "dof".to_string(),
    ];
    header.extend((0..dim).map(|i| format!("mean_{}", i)));
    for i in 0..dim {
        for j in 0..dim {
            header.push(format!("cov_{}_{}", i, j));
        }
    }
    wtr.write_record(&header)?;

    for (idx, (component, &weight)) in mixture
        .components()
        .iter()
        .zip(mixture.weights())
        .enumerate()
    {
        let mut row = vec![
            idx.to_string(),
            component.family().to_string(),
            weight.to_string(),
            component.dof().map(|d| d.to_string()).unwrap_or_default(),
        ];
        row.extend(component.mean().iter().map(|v| v.to_string()));
        let cov = component.cov();
        for i in 0..dim {
            for j in 0..dim {
                row.push(cov[(i, j)].to_string());
            }
        }
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

fn parse_f64(field: &str, what: &str) -> Result<f64, PmcError> {
    field
        .parse::<f64>()
        .map_err(|e| PmcError::Checkpoint(format!("bad {what} value {field:?}: {e}")))
}

/// Loads a mixture proposal previously written by [`save_mixture`].
pub fn load_mixture<P: AsRef<Path>>(filename: P) -> Result<MixtureProposal, PmcError> {
    let mut rdr = Reader::from_reader(File::open(filename)?);

    let headers = rdr.headers()?.clone();
    let dim = headers
        .iter()
        .filter(|h| h.starts_with("mean_"))
        .count();
    if dim == 0 {
        return Err(PmcError::Checkpoint(
            "no mean_* columns in header".to_string(),
        ));
    }
    let expected_fields = 4 + dim + dim * dim;

    let mut components = Vec::new();
    let mut weights = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if record.len() != expected_fields {
            return Err(PmcError::Checkpoint(format!(
                "expected {expected_fields} fields per record, got {}",
                record.len()
            )));
        }
        let family = &record[1];
        let weight = parse_f64(&record[2], "weight")?;

        let mut mean = DVector::zeros(dim);
        for i in 0..dim {
            mean[i] = parse_f64(&record[4 + i], "mean")?;
        }
        let mut cov = DMatrix::zeros(dim, dim);
        for i in 0..dim {
            for j in 0..dim {
                cov[(i, j)] = parse_f64(&record[4 + dim + i * dim + j], "cov")?;
            }
        }

        let component = match family {
            "gaussian" => Component::Gaussian(MvGaussian::new(mean, cov)?),
            "student_t" => {
                let dof = parse_f64(&record[3], "dof")?;
                Component::StudentT(MvStudentT::new(mean, cov, dof)?)
            }
            other => {
                return Err(PmcError::Checkpoint(format!(
                    "unknown component family {other:?}"
                )))
            }
        };
        components.push(component);
        weights.push(weight);
    }

    // The stored weights are already normalized; renormalizing here would
    // perturb their bits and break the exact round trip.
    MixtureProposal::from_normalized(components, weights)
}
