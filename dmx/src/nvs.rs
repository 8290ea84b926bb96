// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Non-volatile storage backend for parameters flagged `NonVolatile`.

/// A key-value store the responder registry uses to persist parameters
/// like DMX_START_ADDRESS or DEVICE_LABEL across power cycles. The crate
/// ships no concrete backend -- an integrator wires up flash, EEPROM, or
/// whatever non-volatile medium the platform offers.
/// `set` takes `&self` rather than `&mut self`: a real backend (flash,
/// EEPROM) wraps its own interior synchronization, and the responder
/// registry keeps a shared `&'static dyn NvsBackend` per registered
/// parameter rather than threading a unique owner through the driver's
/// type parameters.
pub trait NvsBackend {
    fn exists(&self, namespace: &str, key: &str) -> bool;
    /// Reads the value for `key` into `out`, returning the number of bytes
    /// written, or `None` if the key does not exist or `out` is too small.
    fn get(&self, namespace: &str, key: &str, out: &mut [u8]) -> Option<usize>;
    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> bool;
}

/// A backend that stores nothing: `exists` always reports false and `set`
/// is a no-op. This is the default so the crate is usable before an
/// integrator has wired up real storage; parameters flagged `NonVolatile`
/// simply behave like `Owned` ones until a real backend is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNvs;

impl NvsBackend for NullNvs {
    fn exists(&self, _namespace: &str, _key: &str) -> bool { false }

    fn get(&self, _namespace: &str, _key: &str, _out: &mut [u8]) -> Option<usize> {
        log::debug!("NullNvs::get: no backend configured, reporting miss");
        None
    }

    fn set(&self, _namespace: &str, _key: &str, _value: &[u8]) -> bool {
        log::debug!("NullNvs::set: no backend configured, dropping write");
        true
    }
}
