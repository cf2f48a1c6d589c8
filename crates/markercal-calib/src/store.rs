//! Persisted calibration: a `calibrated` flag plus 14 single-precision values
//! in a named preference scope.
//!
//! Keys `"0"` to `"8"` hold the camera matrix in row-major order and `"9"` to
//! `"13"` the distortion coefficients `k1, k2, p1, p2, k3`.

use log::debug;
use markercal_core::{CameraMatrix, Distortion, Intrinsics};
use serde_json::{Map, Value};
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SCOPE: &str = "calibration";
const CALIBRATED_KEY: &str = "calibrated";
const VALUE_COUNT: usize = 14;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("preference `{scope}.{key}` has an unexpected type")]
    InvalidValue { scope: String, key: String },
    #[error("preference `{scope}.{key}` cannot hold the non-finite value {value}")]
    NonFinite {
        scope: String,
        key: String,
        value: f32,
    },
}

/// Scoped key/value preferences.
///
/// Writes may be buffered until [`PreferenceBackend::commit`].
pub trait PreferenceBackend {
    fn get_bool(&self, scope: &str, key: &str) -> Result<Option<bool>, StoreError>;
    fn get_f32(&self, scope: &str, key: &str) -> Result<Option<f32>, StoreError>;
    fn put_bool(&mut self, scope: &str, key: &str, value: bool) -> Result<(), StoreError>;
    fn put_f32(&mut self, scope: &str, key: &str, value: f32) -> Result<(), StoreError>;
    fn remove(&mut self, scope: &str, key: &str) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
}

type Scopes = BTreeMap<String, Map<String, Value>>;

fn read_bool(scopes: &Scopes, scope: &str, key: &str) -> Result<Option<bool>, StoreError> {
    match scopes.get(scope).and_then(|s| s.get(key)) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(StoreError::InvalidValue {
            scope: scope.to_string(),
            key: key.to_string(),
        }),
    }
}

fn read_f32(scopes: &Scopes, scope: &str, key: &str) -> Result<Option<f32>, StoreError> {
    match scopes.get(scope).and_then(|s| s.get(key)) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(|f| Some(f as f32))
            .ok_or_else(|| StoreError::InvalidValue {
                scope: scope.to_string(),
                key: key.to_string(),
            }),
    }
}

fn write_value(scopes: &mut Scopes, scope: &str, key: &str, value: Value) {
    scopes
        .entry(scope.to_string())
        .or_default()
        .insert(key.to_string(), value);
}

fn f32_value(scope: &str, key: &str, value: f32) -> Result<Value, StoreError> {
    serde_json::Number::from_f64(value as f64)
        .map(Value::Number)
        .ok_or_else(|| StoreError::NonFinite {
            scope: scope.to_string(),
            key: key.to_string(),
            value,
        })
}

/// In-process preferences.
#[derive(Clone, Debug, Default)]
pub struct MemoryPreferences {
    scopes: Scopes,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceBackend for MemoryPreferences {
    fn get_bool(&self, scope: &str, key: &str) -> Result<Option<bool>, StoreError> {
        read_bool(&self.scopes, scope, key)
    }

    fn get_f32(&self, scope: &str, key: &str) -> Result<Option<f32>, StoreError> {
        read_f32(&self.scopes, scope, key)
    }

    fn put_bool(&mut self, scope: &str, key: &str, value: bool) -> Result<(), StoreError> {
        write_value(&mut self.scopes, scope, key, Value::Bool(value));
        Ok(())
    }

    fn put_f32(&mut self, scope: &str, key: &str, value: f32) -> Result<(), StoreError> {
        let value = f32_value(scope, key, value)?;
        write_value(&mut self.scopes, scope, key, value);
        Ok(())
    }

    fn remove(&mut self, scope: &str, key: &str) -> Result<(), StoreError> {
        if let Some(s) = self.scopes.get_mut(scope) {
            s.remove(key);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Preferences in a JSON file shaped `{ scope: { key: value } }`.
///
/// The file is read on first access; a missing file is an empty store.
/// [`PreferenceBackend::commit`] replaces the file atomically.
#[derive(Debug)]
pub struct JsonPreferences {
    path: PathBuf,
    scopes: OnceCell<Scopes>,
}

impl JsonPreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scopes: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<&Scopes, StoreError> {
        if let Some(scopes) = self.scopes.get() {
            return Ok(scopes);
        }
        let scopes = match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Scopes::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Scopes::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("loaded preferences from {}", self.path.display());
        Ok(self.scopes.get_or_init(|| scopes))
    }

    fn load_mut(&mut self) -> Result<&mut Scopes, StoreError> {
        self.load()?;
        self.scopes
            .get_mut()
            .ok_or_else(|| StoreError::Io(std::io::Error::other("preferences not loaded")))
    }
}

impl PreferenceBackend for JsonPreferences {
    fn get_bool(&self, scope: &str, key: &str) -> Result<Option<bool>, StoreError> {
        read_bool(self.load()?, scope, key)
    }

    fn get_f32(&self, scope: &str, key: &str) -> Result<Option<f32>, StoreError> {
        read_f32(self.load()?, scope, key)
    }

    fn put_bool(&mut self, scope: &str, key: &str, value: bool) -> Result<(), StoreError> {
        write_value(self.load_mut()?, scope, key, Value::Bool(value));
        Ok(())
    }

    fn put_f32(&mut self, scope: &str, key: &str, value: f32) -> Result<(), StoreError> {
        let value = f32_value(scope, key, value)?;
        write_value(self.load_mut()?, scope, key, value);
        Ok(())
    }

    fn remove(&mut self, scope: &str, key: &str) -> Result<(), StoreError> {
        if let Some(s) = self.load_mut()?.get_mut(scope) {
            s.remove(key);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(self.load()?)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        debug!("saved preferences to {}", self.path.display());
        Ok(())
    }
}

/// Calibration persistence on top of a [`PreferenceBackend`].
#[derive(Debug)]
pub struct CalibrationStore<B: PreferenceBackend> {
    backend: B,
    scope: String,
}

impl<B: PreferenceBackend> CalibrationStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_scope(backend, DEFAULT_SCOPE)
    }

    pub fn with_scope(backend: B, scope: impl Into<String>) -> Self {
        Self {
            backend,
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_inner(self) -> B {
        self.backend
    }

    /// Values in persisted order.
    pub fn encode(intrinsics: &Intrinsics) -> [f32; VALUE_COUNT] {
        let mut values = [0f32; VALUE_COUNT];
        let camera = intrinsics.camera.to_row_major();
        let distortion = intrinsics.distortion.to_array();
        for (dst, src) in values.iter_mut().zip(camera.iter().chain(&distortion)) {
            *dst = *src as f32;
        }
        values
    }

    pub fn decode(values: &[f32; VALUE_COUNT]) -> Intrinsics {
        let v = values.map(f64::from);
        let mut camera = [0.0; 9];
        camera.copy_from_slice(&v[..9]);
        let mut distortion = [0.0; 5];
        distortion.copy_from_slice(&v[9..]);
        Intrinsics::new(
            CameraMatrix::from_row_major(&camera),
            Distortion::from_array(&distortion),
        )
    }

    /// Write the flag and all values, then commit. Non-finite values are
    /// refused before anything is written.
    pub fn save(&mut self, intrinsics: &Intrinsics) -> Result<(), StoreError> {
        let values = Self::encode(intrinsics);
        if let Some((i, v)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(StoreError::NonFinite {
                scope: self.scope.clone(),
                key: i.to_string(),
                value: *v,
            });
        }
        self.backend.put_bool(&self.scope, CALIBRATED_KEY, true)?;
        for (i, v) in values.iter().enumerate() {
            self.backend.put_f32(&self.scope, &i.to_string(), *v)?;
        }
        self.backend.commit()
    }

    /// `None` unless the calibrated flag is set. Missing values read as zero.
    pub fn load(&self) -> Result<Option<Intrinsics>, StoreError> {
        if !self.is_calibrated()? {
            return Ok(None);
        }
        let mut values = [0f32; VALUE_COUNT];
        for (i, v) in values.iter_mut().enumerate() {
            *v = self
                .backend
                .get_f32(&self.scope, &i.to_string())?
                .unwrap_or(0.0);
        }
        Ok(Some(Self::decode(&values)))
    }

    pub fn is_calibrated(&self) -> Result<bool, StoreError> {
        Ok(self
            .backend
            .get_bool(&self.scope, CALIBRATED_KEY)?
            .unwrap_or(false))
    }

    /// Remove the flag and all values, then commit.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.backend.remove(&self.scope, CALIBRATED_KEY)?;
        for i in 0..VALUE_COUNT {
            self.backend.remove(&self.scope, &i.to_string())?;
        }
        self.backend.commit()
    }
}
