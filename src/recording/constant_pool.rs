// src/recording/constant_pool.rs
//! Per-type constant pools
//!
//! Values of pool-backed types are written once into the chunk's checkpoint
//! and referenced by index everywhere else. Index 0 is the null reference.

use crate::recording::types::{Type, TypeRegistry};
use crate::recording::value::FieldValue;
use crate::utils::errors::{RecordingError, Result};
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// A pooled value together with its index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledValue {
    value: FieldValue,
    index: u64,
}

impl PooledValue {
    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_null(&self) -> bool {
        self.index == 0
    }
}

#[derive(Default)]
struct PoolInner {
    indices: HashMap<FieldValue, u64>,
    values: Vec<FieldValue>,
}

/// Deduplicating store for the values of one type
pub struct ConstantPool {
    ty: Arc<Type>,
    inner: RwLock<PoolInner>,
}

impl ConstantPool {
    pub fn new(ty: Arc<Type>) -> Self {
        Self {
            ty,
            inner: RwLock::new(PoolInner::default()),
        }
    }

    pub fn get_type(&self) -> &Arc<Type> {
        &self.ty
    }

    pub fn content_type_id(&self) -> u64 {
        self.ty.content_type_id()
    }

    /// Index of `value`, adding it on first sight
    pub fn add_or_get(&self, value: FieldValue) -> PooledValue {
        if value.is_null() {
            return PooledValue { value, index: 0 };
        }

        let inner = self.inner.upgradable_read();
        if let Some(&index) = inner.indices.get(&value) {
            return PooledValue { value, index };
        }

        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        let index = inner.values.len() as u64 + 1;
        inner.values.push(value.clone());
        inner.indices.insert(value.clone(), index);
        trace!("Pooled {} #{}", self.ty.name(), index);
        PooledValue { value, index }
    }

    pub fn get(&self, index: u64) -> Option<PooledValue> {
        if index == 0 {
            return Some(PooledValue {
                value: FieldValue::Null,
                index,
            });
        }
        let position = usize::try_from(index - 1).ok()?;
        let value = self.inner.read().values.get(position)?.clone();
        Some(PooledValue { value, index })
    }

    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of `(index, value)` in index order
    pub fn entries(&self) -> Vec<(u64, FieldValue)> {
        self.inner
            .read()
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u64 + 1, v.clone()))
            .collect()
    }
}

/// All constant pools of one recording, keyed by type id
#[derive(Default)]
pub struct ConstantPools {
    pools: DashMap<u64, Arc<ConstantPool>>,
}

impl ConstantPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool for `ty`, created on first use
    pub fn pool(&self, ty: &Arc<Type>) -> Result<Arc<ConstantPool>> {
        if !ty.has_constant_pool() {
            return Err(RecordingError::argument(format!(
                "type '{}' is not constant pool backed",
                ty.name()
            )));
        }
        let pool = self
            .pools
            .entry(ty.id())
            .or_insert_with(|| Arc::new(ConstantPool::new(Arc::clone(ty))));
        Ok(Arc::clone(pool.value()))
    }

    /// Pool `value` under `ty` after pooling every pool-backed value nested
    /// inside it, so a checkpoint never refers to a missing entry.
    pub fn intern(&self, registry: &TypeRegistry, ty: &Arc<Type>, value: &FieldValue) -> Result<PooledValue> {
        if value.is_null() {
            return Ok(PooledValue {
                value: FieldValue::Null,
                index: 0,
            });
        }
        self.intern_nested(registry, value)?;
        Ok(self.pool(ty)?.add_or_get(value.clone()))
    }

    fn intern_nested(&self, registry: &TypeRegistry, value: &FieldValue) -> Result<()> {
        let FieldValue::Value(typed) = value else {
            return Ok(());
        };
        for (field, slot) in typed.get_type().fields().iter().zip(typed.values()) {
            let Some(field_value) = slot else {
                continue;
            };
            let target = field.field_type(registry)?;
            let items = match field_value {
                FieldValue::Array(items) => items.as_slice(),
                single => std::slice::from_ref(single),
            };
            for item in items {
                if target.has_constant_pool() {
                    self.intern(registry, &target, item)?;
                } else {
                    self.intern_nested(registry, item)?;
                }
            }
        }
        Ok(())
    }

    /// Pools in content type order
    pub fn snapshot(&self) -> Vec<Arc<ConstantPool>> {
        let mut pools: Vec<Arc<ConstantPool>> =
            self.pools.iter().map(|entry| Arc::clone(entry.value())).collect();
        pools.sort_by_key(|pool| pool.content_type_id());
        pools
    }

    /// Total number of pooled values
    pub fn total_entries(&self) -> usize {
        self.pools.iter().map(|entry| entry.value().len()).sum()
    }
}
