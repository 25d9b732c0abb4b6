#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let registry = objgraph::Registry::new();
    let _ = objgraph::value_from_slice(data, &registry, Default::default());
});
