#[cfg(test)]
mod integration_tests {
    use crate::config::{
        Instrument, Layer, ParamValue, ParameterResolver, Profile, RunTable,
    };
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    /// The shipped sample profile loads and resolves against its instrument
    #[test]
    fn test_sample_profile_resolves_parameters() {
        let profile = Profile::load(Path::new("configs/spirou-profile.yaml")).unwrap();
        assert_eq!(profile.instrument, "SPIROU");
        assert_eq!(profile.scheduler.pool_size(), 4);
        assert_eq!(
            profile.scheduler.wall_time_for("apero_wave", None),
            Duration::from_secs(7200)
        );
        assert_eq!(profile.scheduler.memory_for("apero_wave", None), Some(8000));
        assert_eq!(profile.paths().raw, PathBuf::from("/data/spirou/raw"));
        assert_eq!(profile.paths().calib, PathBuf::from("/data/spirou/apero/calib"));

        let instrument = Instrument::builtin(&profile.instrument).unwrap();
        let params = ParameterResolver::new(&instrument)
            .resolve(&profile.constants, &profile.source, &BTreeMap::new(), "cli")
            .unwrap();

        assert_eq!(params.get_str("CALIB_DB_MATCH").unwrap(), "closest");
        let provenance = params.provenance("DARK_QMIN").unwrap();
        assert_eq!(provenance.layer, Layer::UserConfig);
        assert!(provenance.source.ends_with("spirou-profile.yaml"));
        assert_eq!(
            params.provenance("QC_DARK_TIME").unwrap().source,
            "builtin:spirou.yaml"
        );
    }

    /// Every rule of the sample run table names a distinct id
    #[test]
    fn test_sample_run_table_loads() {
        let table = RunTable::load(Path::new("configs/nightly-calibrations.yaml")).unwrap();
        assert_eq!(table.rules.len(), 9);
        assert_eq!(table.rules[0].recipe, "apero_preprocess");

        let mut ids: Vec<&str> = table.rules.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), table.rules.len());
        assert!(!table.rules.last().unwrap().skip_done);
    }

    /// Constants valid for one instrument can be out of range for the other
    #[test]
    fn test_same_overrides_against_both_instruments() {
        let mut user = BTreeMap::new();
        user.insert("QC_DARK_TIME".to_string(), ParamValue::Float(450.0));

        for name in Instrument::names() {
            let instrument = Instrument::builtin(name).unwrap();
            let params = ParameterResolver::new(&instrument)
                .resolve(&user, "user.yaml", &BTreeMap::new(), "cli")
                .unwrap();
            assert_eq!(params.instrument(), name);
            assert_eq!(params.get_f64("QC_DARK_TIME").unwrap(), 450.0);
        }

        user.insert("DARK_QMAX".to_string(), ParamValue::Int(101));
        let instrument = Instrument::builtin("NIRPS_HA").unwrap();
        assert!(ParameterResolver::new(&instrument)
            .resolve(&user, "user.yaml", &BTreeMap::new(), "cli")
            .is_err());
    }
}
