//! # Register Store
//!
//! Storage for the two register namespaces a server exposes: holding
//! registers (read/write) and input registers (read-only from the wire, but
//! writable by the host application).
//!
//! Addresses only exist once a range covering them has been declared with
//! [`RegisterStore::declare_range`]. Every access outside a declared range
//! fails with [`ModbusError::OutOfRange`]; nothing is created implicitly.
//!
//! ## Callbacks
//!
//! A callback can be bound per `(namespace, address, access)`. It receives the
//! address and a value and returns the value that is actually used:
//!
//! - **Read**: called with the stored value; the return value is handed to
//!   the requester and is *not* written back.
//! - **Write**: called with the incoming value; the return value is stored.
//!
//! ```rust
//! use voltage_modbus_server::{Access, RegisterKind, RegisterStore};
//!
//! let mut store = RegisterStore::new();
//! store.declare_range(RegisterKind::Holding, 0, 10, 0).unwrap();
//!
//! // Clamp every write into 0..=1000
//! store
//!     .bind_callback(RegisterKind::Holding, 0, Access::Write, 10, |_addr, v| v.min(1000))
//!     .unwrap();
//!
//! store.write(RegisterKind::Holding, 3, 5000).unwrap();
//! assert_eq!(store.read(RegisterKind::Holding, 3).unwrap(), 1000);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{ModbusError, ModbusResult};

/// Register namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterKind {
    /// Holding registers (FC03 read, FC06/FC16 write)
    Holding,
    /// Input registers (FC04 read)
    Input,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::Holding => write!(f, "holding"),
            RegisterKind::Input => write!(f, "input"),
        }
    }
}

/// Direction of a register access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    Read,
    Write,
}

/// Callback invoked on register access: `(address, value) -> value`
pub type RegisterCallback = Arc<dyn Fn(u16, u16) -> u16 + Send + Sync>;

/// Outcome of a successful range declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeDeclaration {
    /// Storage was allocated
    Created,
    /// An identical range already existed; values were left untouched
    AlreadyExists,
}

/// A contiguous block of declared addresses in one namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRange {
    pub kind: RegisterKind,
    pub start: u16,
    pub count: u16,
}

impl RegisterRange {
    pub fn new(kind: RegisterKind, start: u16, count: u16) -> Self {
        Self { kind, start, count }
    }

    /// One past the last address, widened so that `0xFFFF + 1` fits
    #[inline]
    pub fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }

    #[inline]
    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && (address as u32) < self.end()
    }

    pub fn overlaps(&self, other: &RegisterRange) -> bool {
        (self.start as u32) < other.end() && (other.start as u32) < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CallbackKey {
    kind: RegisterKind,
    address: u16,
    access: Access,
}

/// Values and declared ranges of one namespace
#[derive(Debug, Default)]
struct Namespace {
    ranges: Vec<RegisterRange>,
    values: HashMap<u16, u16>,
}

impl Namespace {
    fn covers(&self, address: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(address))
    }
}

/// Holding and input register storage with access callbacks
#[derive(Default)]
pub struct RegisterStore {
    holding: Namespace,
    input: Namespace,
    callbacks: HashMap<CallbackKey, RegisterCallback>,
}

impl fmt::Debug for RegisterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterStore")
            .field("holding_ranges", &self.holding.ranges)
            .field("input_ranges", &self.input.ranges)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl RegisterStore {
    /// Create an empty store with no declared ranges
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(&self, kind: RegisterKind) -> &Namespace {
        match kind {
            RegisterKind::Holding => &self.holding,
            RegisterKind::Input => &self.input,
        }
    }

    fn namespace_mut(&mut self, kind: RegisterKind) -> &mut Namespace {
        match kind {
            RegisterKind::Holding => &mut self.holding,
            RegisterKind::Input => &mut self.input,
        }
    }

    /// Declare `count` consecutive registers starting at `start`.
    ///
    /// Re-declaring an identical range is a no-op that keeps the stored
    /// values. A range that overlaps an existing one with different bounds
    /// is rejected with [`ModbusError::RangeConflict`].
    pub fn declare_range(
        &mut self,
        kind: RegisterKind,
        start: u16,
        count: u16,
        initial_value: u16,
    ) -> ModbusResult<RangeDeclaration> {
        if count == 0 {
            return Err(ModbusError::configuration(format!(
                "{} range at {} must contain at least one register",
                kind, start
            )));
        }

        let range = RegisterRange::new(kind, start, count);
        if range.end() > 0x1_0000 {
            return Err(ModbusError::configuration(format!(
                "{} range {}+{} runs past address 65535",
                kind, start, count
            )));
        }

        let namespace = self.namespace_mut(kind);
        if namespace.ranges.contains(&range) {
            debug!("{} range {}+{} already declared", kind, start, count);
            return Ok(RangeDeclaration::AlreadyExists);
        }

        if let Some(existing) = namespace.ranges.iter().find(|r| r.overlaps(&range)) {
            return Err(ModbusError::RangeConflict {
                kind,
                start,
                count,
                existing_start: existing.start,
                existing_count: existing.count,
            });
        }

        for offset in 0..count {
            namespace.values.insert(start + offset, initial_value);
        }
        namespace.ranges.push(range);

        debug!(
            "Declared {} range {}+{} (initial 0x{:04X})",
            kind, start, count, initial_value
        );
        Ok(RangeDeclaration::Created)
    }

    /// Declared ranges of a namespace in declaration order
    pub fn ranges(&self, kind: RegisterKind) -> &[RegisterRange] {
        &self.namespace(kind).ranges
    }

    /// Whether `address` lies in a declared range
    pub fn contains(&self, kind: RegisterKind, address: u16) -> bool {
        self.namespace(kind).covers(address)
    }

    /// Check that every address of `start..start + count` is declared.
    ///
    /// Returns the first failing address as [`ModbusError::OutOfRange`].
    pub fn check_span(&self, kind: RegisterKind, start: u16, count: u16) -> ModbusResult<()> {
        let namespace = self.namespace(kind);
        for offset in 0..count as u32 {
            let address = start as u32 + offset;
            if address > u16::MAX as u32 || !namespace.covers(address as u16) {
                return Err(ModbusError::OutOfRange {
                    kind,
                    address: address.min(u16::MAX as u32) as u16,
                });
            }
        }
        Ok(())
    }

    /// Stored value without invoking any callback
    pub fn raw_value(&self, kind: RegisterKind, address: u16) -> ModbusResult<u16> {
        self.namespace(kind)
            .values
            .get(&address)
            .copied()
            .ok_or(ModbusError::OutOfRange { kind, address })
    }

    /// Read a register, passing the stored value through its read callback
    pub fn read(&self, kind: RegisterKind, address: u16) -> ModbusResult<u16> {
        let stored = self.raw_value(kind, address)?;
        let key = CallbackKey {
            kind,
            address,
            access: Access::Read,
        };
        match self.callbacks.get(&key) {
            Some(callback) => {
                let value = callback(address, stored);
                trace!(
                    "Read callback {} {}: 0x{:04X} -> 0x{:04X}",
                    kind,
                    address,
                    stored,
                    value
                );
                Ok(value)
            }
            None => Ok(stored),
        }
    }

    /// Write a register, storing whatever its write callback returns
    pub fn write(&mut self, kind: RegisterKind, address: u16, value: u16) -> ModbusResult<()> {
        if !self.contains(kind, address) {
            return Err(ModbusError::OutOfRange { kind, address });
        }

        let key = CallbackKey {
            kind,
            address,
            access: Access::Write,
        };
        let stored = match self.callbacks.get(&key) {
            Some(callback) => {
                let stored = callback(address, value);
                trace!(
                    "Write callback {} {}: 0x{:04X} -> 0x{:04X}",
                    kind,
                    address,
                    value,
                    stored
                );
                stored
            }
            None => value,
        };

        self.namespace_mut(kind).values.insert(address, stored);
        Ok(())
    }

    /// Read `count` registers; fails before invoking any callback if part of
    /// the span is undeclared
    pub fn read_range(&self, kind: RegisterKind, start: u16, count: u16) -> ModbusResult<Vec<u16>> {
        self.check_span(kind, start, count)?;
        (0..count).map(|offset| self.read(kind, start + offset)).collect()
    }

    /// Write consecutive registers; all-or-nothing with respect to the
    /// declared span
    pub fn write_range(&mut self, kind: RegisterKind, start: u16, values: &[u16]) -> ModbusResult<()> {
        let count = u16::try_from(values.len())
            .map_err(|_| ModbusError::invalid_data(format!("{} values exceed the address space", values.len())))?;
        self.check_span(kind, start, count)?;
        for (offset, &value) in values.iter().enumerate() {
            self.write(kind, start + offset as u16, value)?;
        }
        Ok(())
    }

    /// Bind `callback` to `count` consecutive addresses starting at `address`.
    ///
    /// All addresses must be declared. An existing callback for the same
    /// `(namespace, address, access)` is replaced and a warning is logged.
    pub fn bind_callback<F>(
        &mut self,
        kind: RegisterKind,
        address: u16,
        access: Access,
        count: u16,
        callback: F,
    ) -> ModbusResult<()>
    where
        F: Fn(u16, u16) -> u16 + Send + Sync + 'static,
    {
        if count == 0 {
            return Err(ModbusError::configuration(format!(
                "{:?} callback at {} {} must cover at least one register",
                access, kind, address
            )));
        }
        self.check_span(kind, address, count)?;

        let callback: RegisterCallback = Arc::new(callback);
        let mut replaced = 0usize;
        for offset in 0..count {
            let key = CallbackKey {
                kind,
                address: address + offset,
                access,
            };
            if self.callbacks.insert(key, Arc::clone(&callback)).is_some() {
                replaced += 1;
            }
        }

        if replaced > 0 {
            warn!(
                "Replaced {} existing {:?} callback(s) on {} registers {}+{}",
                replaced, access, kind, address, count
            );
        }
        debug!(
            "Bound {:?} callback on {} registers {}+{}",
            access, kind, address, count
        );
        Ok(())
    }

    /// Whether a callback is bound for the given key
    pub fn has_callback(&self, kind: RegisterKind, address: u16, access: Access) -> bool {
        self.callbacks.contains_key(&CallbackKey {
            kind,
            address,
            access,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn holding_store() -> RegisterStore {
        let mut store = RegisterStore::new();
        store
            .declare_range(RegisterKind::Holding, 0, 10, 0)
            .unwrap();
        store
    }

    #[test]
    fn test_declare_and_read_initial_values() {
        let mut store = RegisterStore::new();
        assert_eq!(
            store.declare_range(RegisterKind::Input, 100, 4, 0x1234).unwrap(),
            RangeDeclaration::Created
        );
        for addr in 100..104 {
            assert_eq!(store.read(RegisterKind::Input, addr).unwrap(), 0x1234);
        }
        assert!(!store.contains(RegisterKind::Input, 104));
        assert!(!store.contains(RegisterKind::Holding, 100));
    }

    #[test]
    fn test_redeclare_identical_range_keeps_values() {
        let mut store = holding_store();
        store.write(RegisterKind::Holding, 5, 77).unwrap();

        let outcome = store.declare_range(RegisterKind::Holding, 0, 10, 0).unwrap();
        assert_eq!(outcome, RangeDeclaration::AlreadyExists);
        assert_eq!(store.read(RegisterKind::Holding, 5).unwrap(), 77);
    }

    #[test]
    fn test_overlapping_range_with_different_count_fails() {
        let mut store = holding_store();
        let err = store
            .declare_range(RegisterKind::Holding, 0, 20, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            ModbusError::RangeConflict {
                existing_start: 0,
                existing_count: 10,
                ..
            }
        ));
        assert!(err.is_configuration_error());

        // Adjacent ranges do not overlap
        assert_eq!(
            store.declare_range(RegisterKind::Holding, 10, 5, 0).unwrap(),
            RangeDeclaration::Created
        );
        // Same addresses in the other namespace are independent
        assert_eq!(
            store.declare_range(RegisterKind::Input, 0, 20, 0).unwrap(),
            RangeDeclaration::Created
        );
    }

    #[test]
    fn test_invalid_range_bounds() {
        let mut store = RegisterStore::new();
        assert!(store.declare_range(RegisterKind::Holding, 0, 0, 0).is_err());
        assert!(store
            .declare_range(RegisterKind::Holding, 0xFFF0, 0x20, 0)
            .is_err());
        assert!(store
            .declare_range(RegisterKind::Holding, 0xFFF0, 0x10, 0)
            .is_ok());
        assert!(store.contains(RegisterKind::Holding, 0xFFFF));
    }

    #[test]
    fn test_out_of_range_access() {
        let mut store = holding_store();
        assert_eq!(
            store.read(RegisterKind::Holding, 10),
            Err(ModbusError::OutOfRange {
                kind: RegisterKind::Holding,
                address: 10
            })
        );
        assert!(store.write(RegisterKind::Holding, 10, 1).is_err());
        // Never created implicitly
        assert!(!store.contains(RegisterKind::Holding, 10));
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let mut store = holding_store();
        store.write(RegisterKind::Holding, 3, 0xBEEF).unwrap();
        assert_eq!(store.read(RegisterKind::Holding, 3).unwrap(), 0xBEEF);
    }

    #[test]
    fn test_write_callback_transforms_stored_value() {
        let mut store = holding_store();
        store
            .bind_callback(RegisterKind::Holding, 0, Access::Write, 10, |_, v| {
                v.wrapping_mul(2)
            })
            .unwrap();

        store.write(RegisterKind::Holding, 4, 21).unwrap();
        assert_eq!(store.read(RegisterKind::Holding, 4).unwrap(), 42);
        assert_eq!(store.raw_value(RegisterKind::Holding, 4).unwrap(), 42);
    }

    #[test]
    fn test_read_callback_is_not_persisted() {
        let mut store = holding_store();
        store.write(RegisterKind::Holding, 2, 10).unwrap();
        store
            .bind_callback(RegisterKind::Holding, 2, Access::Read, 1, |addr, v| v + addr)
            .unwrap();

        assert_eq!(store.read(RegisterKind::Holding, 2).unwrap(), 12);
        assert_eq!(store.raw_value(RegisterKind::Holding, 2).unwrap(), 10);
        // Neighbours are unaffected
        assert_eq!(store.read(RegisterKind::Holding, 3).unwrap(), 0);
    }

    #[test]
    fn test_range_callback_receives_each_address() {
        let mut store = holding_store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store
            .bind_callback(RegisterKind::Holding, 4, Access::Read, 3, move |addr, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                addr
            })
            .unwrap();

        let values = store.read_range(RegisterKind::Holding, 3, 5).unwrap();
        assert_eq!(values, vec![0, 4, 5, 6, 0]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_callback_replacement() {
        let mut store = holding_store();
        store
            .bind_callback(RegisterKind::Holding, 0, Access::Write, 1, |_, _| 1)
            .unwrap();
        store
            .bind_callback(RegisterKind::Holding, 0, Access::Write, 1, |_, _| 2)
            .unwrap();

        store.write(RegisterKind::Holding, 0, 99).unwrap();
        assert_eq!(store.read(RegisterKind::Holding, 0).unwrap(), 2);
    }

    #[test]
    fn test_callback_on_undeclared_address_fails() {
        let mut store = holding_store();
        let err = store
            .bind_callback(RegisterKind::Holding, 8, Access::Read, 5, |_, v| v)
            .unwrap_err();
        assert_eq!(
            err,
            ModbusError::OutOfRange {
                kind: RegisterKind::Holding,
                address: 10
            }
        );
        // Nothing was bound
        assert!(!store.has_callback(RegisterKind::Holding, 8, Access::Read));
    }

    #[test]
    fn test_write_range_is_all_or_nothing() {
        let mut store = holding_store();
        let err = store
            .write_range(RegisterKind::Holding, 8, &[1, 2, 3])
            .unwrap_err();
        assert!(matches!(err, ModbusError::OutOfRange { address: 10, .. }));
        assert_eq!(store.read(RegisterKind::Holding, 8).unwrap(), 0);
        assert_eq!(store.read(RegisterKind::Holding, 9).unwrap(), 0);

        store.write_range(RegisterKind::Holding, 7, &[1, 2, 3]).unwrap();
        assert_eq!(
            store.read_range(RegisterKind::Holding, 7, 3).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_span_spanning_two_adjacent_ranges() {
        let mut store = holding_store();
        store
            .declare_range(RegisterKind::Holding, 10, 10, 5)
            .unwrap();
        assert_eq!(
            store.read_range(RegisterKind::Holding, 8, 4).unwrap(),
            vec![0, 0, 5, 5]
        );
    }
}
