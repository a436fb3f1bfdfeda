//! Integration tests for mnemo

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use mnemo::binding::BoundArgs;
use mnemo::function_id;
use mnemo::{CacheableFunction, CallArgs, DiskBackend, MnemoError, Signature};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn add_signature() -> Signature {
    Signature::builder()
        .required("a")
        .optional("b", 10)
        .build()
        .unwrap()
}

fn add<'a>(
    temp: &TempDir,
    calls: &'a AtomicUsize,
) -> CacheableFunction<i64, impl Fn(&BoundArgs) -> i64 + 'a> {
    CacheableFunction::new(function_id!(add), add_signature(), move |args| {
        calls.fetch_add(1, Ordering::SeqCst);
        let a = args.get("a").and_then(serde_json::Value::as_i64).unwrap_or(0);
        let b = args.get("b").and_then(serde_json::Value::as_i64).unwrap_or(0);
        a + b
    })
    .with_backend(DiskBackend::at(temp.path()))
}

mod memoization {
    use super::*;

    #[test]
    fn second_call_is_served_from_disk() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        let _scope = add.enable_cache(true, true);
        assert_eq!(add.call(&CallArgs::new().arg(1).arg(2)).unwrap(), 3);
        assert_eq!(add.call(&CallArgs::new().arg(1).arg(2)).unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn defaulted_and_explicit_calls_share_an_entry() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        let _scope = add.enable_cache(true, true);
        assert_eq!(add.call(&CallArgs::new().arg(1)).unwrap(), 11);
        assert_eq!(add.call(&CallArgs::new().arg(1).kwarg("b", 10)).unwrap(), 11);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(add.list_cached().unwrap().len(), 1);
    }

    #[test]
    fn entries_survive_a_new_wrapper_instance() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);

        {
            let add = add(&temp, &calls);
            let _scope = add.enable_cache(true, true);
            add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        }

        // A fresh process would construct the wrapper anew over the same base
        let add = add(&temp, &calls);
        let _scope = add.enable_cache(true, false);
        assert_eq!(add.call(&CallArgs::new().arg(1).arg(2)).unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disabled_by_default() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(add.list_cached().unwrap().is_empty());
    }
}

mod enablement {
    use super::*;
    use mnemo::controller::{DISABLED_ENV, ENABLED_ENV};
    use mnemo::{disable_all_caches, enable_all_caches};
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(ENABLED_ENV);
        std::env::remove_var(DISABLED_ENV);
        mnemo::controller::global().reset();
    }

    #[test]
    #[serial]
    fn global_enable_reaches_every_function() {
        init_tracing();
        clear_env();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        let _global = enable_all_caches(true, true);
        assert_eq!(add.call(&CallArgs::new().arg(1).arg(2)).unwrap(), 3);
        assert_eq!(add.call(&CallArgs::new().arg(1).arg(2)).unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[serial]
    fn global_disable_beats_function_enable() {
        init_tracing();
        clear_env();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        let _function = add.enable_cache(true, true);
        let _global = disable_all_caches();
        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(add.list_cached().unwrap().is_empty());
    }

    #[test]
    #[serial]
    fn env_disable_beats_everything() {
        init_tracing();
        clear_env();
        std::env::set_var(DISABLED_ENV, "true");

        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        let _function = add.enable_cache(true, true);
        let _global = enable_all_caches(true, true);
        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        clear_env();
    }

    #[test]
    #[serial]
    fn function_disable_beats_global_enable() {
        init_tracing();
        clear_env();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        let _global = enable_all_caches(true, true);
        let _function = add.disable_cache();
        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

mod by_id {
    use super::*;

    #[test]
    fn dump_load_metadata_and_path() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        let _scope = add.enable_cache(true, true);
        let args = CallArgs::new().arg(1).arg(2);
        add.call(&args).unwrap();

        let input_id = add.input_id(&args).unwrap();
        assert_eq!(add.load_output(&input_id).unwrap(), 3);

        let metadata = add.load_metadata(&input_id).unwrap();
        assert_eq!(metadata.input_id, input_id);
        assert!(metadata.last_accessed_at.is_some());

        let path = add.output_path(&input_id).unwrap();
        assert!(path.is_file());
        assert!(path.starts_with(temp.path()));
        let on_disk: i64 = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, 3);
    }

    #[test]
    fn precomputed_output_can_be_planted() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        let _scope = add.enable_cache(true, true);
        let args = CallArgs::new().arg(40).arg(2);
        let input_id = add.input_id(&args).unwrap();

        add.dump_output(&42, &input_id).unwrap();
        assert_eq!(add.call(&args).unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn by_id_apis_refuse_when_disabled() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        assert!(matches!(
            add.load_output("0000000000000000").unwrap_err(),
            MnemoError::CacheNotEnabled(_)
        ));
        assert!(matches!(
            add.dump_output(&3, "0000000000000000").unwrap_err(),
            MnemoError::CacheNotEnabled(_)
        ));
    }
}

mod maintenance {
    use super::*;

    #[test]
    fn clear_cache_forces_recomputation() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let add = add(&temp, &calls);

        let _scope = add.enable_cache(true, true);
        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        add.clear_cache().unwrap();
        add.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn renamed_function_adopts_old_entries() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);

        let old = CacheableFunction::new("legacy:sum", add_signature(), |_args: &BoundArgs| 3i64)
            .with_backend(DiskBackend::at(temp.path()));
        {
            let _scope = old.enable_cache(true, true);
            old.call(&CallArgs::new().arg(1).arg(2)).unwrap();
        }

        let add = add(&temp, &calls);
        add.adopt_cache("legacy:sum").unwrap();

        let _scope = add.enable_cache(true, false);
        assert_eq!(add.call(&CallArgs::new().arg(1).arg(2)).unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

mod structured_outputs {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Report {
        name: String,
        totals: Vec<i64>,
    }

    #[test]
    fn struct_outputs_roundtrip_through_disk() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);

        let report = CacheableFunction::new(
            function_id!(report),
            Signature::builder().required("name").build().unwrap(),
            |args: &BoundArgs| {
                calls.fetch_add(1, Ordering::SeqCst);
                Report {
                    name: args
                        .get("name")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    totals: vec![1, 2, 3],
                }
            },
        )
        .with_backend(DiskBackend::at(temp.path()));

        let _scope = report.enable_cache(true, true);
        let args = CallArgs::new().arg("march");
        let first = report.call(&args).unwrap();
        let second = report.call(&args).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.name, "march");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
