#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not. A config that
    // validates must also build a pipeline.
    let Ok(cfg) = pour_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        let engine = pour_core::EngineCfg::from(&cfg);
        if let Err(e) = pour_core::Pipeline::new(&engine) {
            panic!("validated config rejected by the engine: {e}");
        }
    }
});
