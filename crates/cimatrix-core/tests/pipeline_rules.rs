//! Cross-module rules: matrix expansion, install sets and gates working
//! from one configuration.

use std::collections::HashSet;

use cimatrix_core::{
    bucket_shuffle, evaluate, resolve_install_set, BuildFacts, EnvironmentResolver,
    EnvironmentSettings, GateContext, InterpreterCatalog, MatrixLeg, PipelineConfig,
    RecordPolicy, Trigger,
};

#[test]
fn default_matrix_has_every_combination_once() {
    let config = PipelineConfig::default();
    let legs = config.legs().unwrap();

    let v = config.matrix.versions.len();
    let f = config.matrix.concurrency.len();
    assert_eq!(legs.len(), v * f);

    let unique: HashSet<&MatrixLeg> = legs.iter().collect();
    assert_eq!(unique.len(), legs.len());

    // flags outer, versions inner
    assert!(legs[..v].iter().all(|l| l.concurrency_enabled));
    assert!(legs[v..].iter().all(|l| !l.concurrency_enabled));
    assert_eq!(legs[v].interpreter_version, config.matrix.versions[0]);
}

#[test]
fn install_set_pins_only_the_legacy_version() {
    let config = PipelineConfig::default();
    for version in &config.matrix.versions {
        let set = resolve_install_set(
            &config.install.base_packages,
            &config.install.pins,
            version,
        )
        .unwrap();
        let gevent = set.iter().find(|p| p.name == "gevent").unwrap();
        if version == "3.4" {
            assert_eq!(gevent.version_constraint.as_deref(), Some("<1.5"));
        } else {
            assert!(!gevent.is_pinned(), "{} should be unconstrained", version);
        }
        assert!(set.iter().any(|p| p.name == "pytest-random-order"));
    }
}

#[test]
fn resolver_covers_matrix_from_explicit_catalog() {
    let config = PipelineConfig::default();
    let catalog = InterpreterCatalog::fixed(
        config
            .matrix
            .versions
            .iter()
            .map(|v| (v.clone(), format!("/opt/python/{}/bin/python", v))),
    );
    let resolver = EnvironmentResolver::new(catalog, EnvironmentSettings::default());
    for leg in config.legs().unwrap() {
        let env = resolver.resolve(&leg).unwrap();
        assert_eq!(env.env_vars["GEVENT"], leg.concurrency_enabled.to_string());
        assert_eq!(env.leg, leg);
    }
}

#[test]
fn only_the_record_leg_on_trunk_opens_docs_gate() {
    let mut config = PipelineConfig::from_toml_str(
        r#"
        trunk_branch = "trunk"

        [matrix]
        versions = ["3.6", "3.7"]
        record = { type = "matching", version = "3.7", concurrency = false }
        "#,
    )
    .unwrap();
    let legs = config.legs().unwrap();
    let record = config.matrix.record.select(&legs).unwrap();
    assert_eq!(legs[record], MatrixLeg::new("3.7", false));

    let trigger = Trigger::push("trunk");
    let facts = BuildFacts {
        success: true,
        cancelled: false,
    };
    let open: Vec<usize> = (0..legs.len())
        .filter(|i| {
            let ctx = GateContext::new(&trigger, *i == record);
            evaluate(
                &cimatrix_core::docs_conditions(&config.trunk_branch),
                &ctx,
                facts,
            )
            .open()
        })
        .collect();
    assert_eq!(open, vec![record]);

    config.matrix.record = RecordPolicy::Position { index: 9 };
    assert!(config.validate().is_err());
}

#[test]
fn shuffle_is_reproducible_and_keeps_packages_together() {
    let ids = [
        "tests/core/test_a.py::test_1",
        "tests/core/test_a.py::test_2",
        "tests/core/test_b.py::test_3",
        "tests/io/test_c.py::test_4",
        "tests/io/test_c.py::test_5",
    ];
    let a = bucket_shuffle(&ids, 42);
    let b = bucket_shuffle(&ids, 42);
    assert_eq!(a, b);
    assert!(a[..3].iter().all(|id| id.starts_with("tests/core/")));
    assert!(a[3..].iter().all(|id| id.starts_with("tests/io/")));
}
