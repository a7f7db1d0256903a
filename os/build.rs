// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

fn main() {
    println!(r#"cargo:rustc-check-cfg=cfg(sos_has_native_rmw)"#);
    println!("cargo:rerun-if-changed=build.rs");

    let target = std::env::var("TARGET").unwrap_or_default();
    match target.as_str() {
        "thumbv6m-none-eabi" => {
            // ARMv6-M has no atomic swap; atomic::AtomicExt falls back to
            // masking interrupts.
        }
        _ => {
            // Everything else we build for (ARMv7-M and up, RISC-V with the
            // A extension, and any host running the unit tests) has native
            // read-modify-write atomics.
            println!("cargo:rustc-cfg=sos_has_native_rmw");
        }
    }
}
