//! Integration tests for the bayesemble ensemble-restraint library

use assert_approx_eq::assert_approx_eq;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

use bayesemble::config::{ChemicalShiftConfig, DistanceConfig, FamilyConfig};
use bayesemble::ensemble::Ensemble;
use bayesemble::io::collect_state_inputs;
use bayesemble::restraint::Restraint;

fn write_file(dir: &Path, name: &str, contents: &str) {
    let mut f = fs::File::create(dir.join(name)).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
}

fn cs_file(model: f64) -> String {
    format!("atom_index1,exp,model\n5,1.0,{}\n", model)
}

/// Posterior energy of one state at the initial grid indices
fn initial_energy(restraints: &[Box<dyn Restraint>]) -> f64 {
    restraints
        .iter()
        .map(|r| {
            let (params, indices) = r.initial_parameters();
            r.neg_log_posterior(&params, &indices).unwrap()
        })
        .sum()
}

/// Three conformations, one chemical-shift observation each. The state
/// whose predicted shift matches the measurement exactly must score
/// strictly better than the two that miss by one, and the two misses
/// are symmetric so their posteriors agree.
#[test]
fn test_matching_state_scores_best() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "0.cs_H", &cs_file(1.0));
    write_file(dir.path(), "1.cs_H", &cs_file(2.0));
    write_file(dir.path(), "2.cs_H", &cs_file(0.0));

    let input = collect_state_inputs(dir.path()).unwrap();
    let configs = vec![FamilyConfig::ChemicalShift(ChemicalShiftConfig::default())];

    let mut ensemble = Ensemble::new(1.0, vec![0.0, 0.0, 0.0]).unwrap();
    ensemble.initialize_restraints(&input, &configs, None).unwrap();

    let states = ensemble.to_list();
    let e0 = initial_energy(&states[0]);
    let e1 = initial_energy(&states[1]);
    let e2 = initial_energy(&states[2]);

    assert!(e1 > e0, "overshooting state should score worse: {} vs {}", e1, e0);
    assert!(e2 > e0, "undershooting state should score worse: {} vs {}", e2, e0);
    assert_approx_eq!(e1, e2, 1e-12);
}

/// Listing a state's observation files in a different order must not
/// change any posterior value; families are matched by tag, not
/// position.
#[test]
fn test_family_order_does_not_affect_posteriors() {
    let noe = "atom_index1,atom_index2,exp,model,restraint_index\n1,8,3.0,3.4,1\n2,9,5.0,4.8,2\n";
    let configs = vec![
        FamilyConfig::ChemicalShift(ChemicalShiftConfig::default()),
        FamilyConfig::Distance(DistanceConfig::default()),
    ];

    // Same observations; the second layout reverses the per-state file
    // set so directory iteration order cannot matter.
    let energies = |dir: &Path| -> Vec<f64> {
        let input = collect_state_inputs(dir).unwrap();
        let mut ensemble = Ensemble::new(1.0, vec![0.0, -1.5]).unwrap();
        ensemble.initialize_restraints(&input, &configs, None).unwrap();
        ensemble.to_list().iter().map(|s| initial_energy(s)).collect()
    };

    let a = tempdir().unwrap();
    write_file(a.path(), "0.cs_H", &cs_file(1.5));
    write_file(a.path(), "0.noe", noe);
    write_file(a.path(), "1.cs_H", &cs_file(0.5));
    write_file(a.path(), "1.noe", noe);

    let b = tempdir().unwrap();
    write_file(b.path(), "1.noe", noe);
    write_file(b.path(), "1.cs_H", &cs_file(0.5));
    write_file(b.path(), "0.noe", noe);
    write_file(b.path(), "0.cs_H", &cs_file(1.5));

    let ea = energies(a.path());
    let eb = energies(b.path());
    assert_eq!(ea.len(), 2);
    for (x, y) in ea.iter().zip(&eb) {
        assert_approx_eq!(x, y, 1e-12);
    }
}

/// A lambda of zero removes the conformational free energies from the
/// ensemble while leaving the restraint posteriors untouched.
#[test]
fn test_lambda_zero_flattens_state_energies() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "0.cs_H", &cs_file(1.3));
    write_file(dir.path(), "1.cs_H", &cs_file(1.3));

    let input = collect_state_inputs(dir.path()).unwrap();
    let configs = vec![FamilyConfig::ChemicalShift(ChemicalShiftConfig::default())];

    let mut flat = Ensemble::new(0.0, vec![2.0, 7.0]).unwrap();
    flat.initialize_restraints(&input, &configs, None).unwrap();
    assert_approx_eq!(flat.energies()[0], 0.0);
    assert_approx_eq!(flat.energies()[1], 0.0);

    let mut coupled = Ensemble::new(1.0, vec![2.0, 7.0]).unwrap();
    coupled.initialize_restraints(&input, &configs, None).unwrap();

    // Identical data, so the restraint terms agree across lambdas
    assert_approx_eq!(
        initial_energy(&flat.to_list()[0]),
        initial_energy(&coupled.to_list()[0]),
        1e-12
    );
}

/// End-to-end sanity of the posterior value itself: one observation
/// with residual r at sigma from the default grid midpoint gives
/// ln(sigma) + r^2/(2 sigma^2) + ln(2 pi)/2.
#[test]
fn test_posterior_value_matches_closed_form() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "0.cs_H", &cs_file(3.0));

    let input = collect_state_inputs(dir.path()).unwrap();
    let configs = vec![FamilyConfig::ChemicalShift(ChemicalShiftConfig::default())];

    let mut ensemble = Ensemble::new(1.0, vec![0.0]).unwrap();
    ensemble.initialize_restraints(&input, &configs, None).unwrap();

    let restraint = &ensemble.to_list()[0][0];
    let (params, indices) = restraint.initial_parameters();
    let sigma = params[0];
    assert_eq!(indices[0], restraint.sigma_grid().initial_index());

    let sse = (1.0f64 - 3.0).powi(2);
    let expected = sigma.ln()
        + sse / (2.0 * sigma * sigma)
        + 0.5 * (2.0 * std::f64::consts::PI).ln();
    assert_approx_eq!(
        restraint.neg_log_posterior(&params, &indices).unwrap(),
        expected,
        1e-12
    );
}
