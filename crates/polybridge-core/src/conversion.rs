//! Conversion rules between language/type pairs.
//!
//! A [`MappingRule`] maps `(source language, source type)` to
//! `(target language, target type)` with a conversion function and an optional
//! validation function. Rules live in an append-only [`ConversionTable`];
//! lookup is a linear scan returning the first match, so registration order is
//! the only precedence and exact duplicates are rejected outright.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use rustc_hash::FxHashSet;

use crate::error::{FfiError, FfiResult};
use crate::type_id::TypeId;
use crate::value::Value;

bitflags! {
    /// Flags modifying a single conversion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConvertFlags: u32 {
        /// Reject conversions that may lose precision or truncate.
        const STRICT = 1 << 0;
        /// The destination is a pre-validated buffer; skip the rule's
        /// validation function.
        const SKIP_VALIDATION = 1 << 1;
    }
}

/// The conversion body of a rule.
pub type ConvertFn = Arc<dyn Fn(&Value, ConvertFlags) -> FfiResult<Value> + Send + Sync>;

/// Optional pre-conversion validation.
pub type ValidateFn = Arc<dyn Fn(&Value) -> FfiResult<()> + Send + Sync>;

/// Language name matched by a rule endpoint.
///
/// `Any` matches every registered language; builtin primitive rules use it so
/// one rule serves all language pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LanguageMatch {
    /// Matches any language.
    Any,
    /// Matches exactly this language name.
    Exact(String),
}

impl LanguageMatch {
    /// Build an exact matcher.
    pub fn exact(name: impl Into<String>) -> Self {
        LanguageMatch::Exact(name.into())
    }

    fn matches(&self, lang: &str) -> bool {
        match self {
            LanguageMatch::Any => true,
            LanguageMatch::Exact(name) => name == lang,
        }
    }
}

/// One conversion rule.
#[derive(Clone)]
pub struct MappingRule {
    /// Source language endpoint.
    pub src_lang: LanguageMatch,
    /// Source canonical type.
    pub src_type: TypeId,
    /// Target language endpoint.
    pub dst_lang: LanguageMatch,
    /// Target canonical type.
    pub dst_type: TypeId,
    /// The conversion body; owns correctness of size and alignment.
    pub convert: ConvertFn,
    /// Optional validation run before conversion.
    pub validate: Option<ValidateFn>,
}

impl MappingRule {
    /// Build a rule with no validation.
    pub fn new(
        src_lang: LanguageMatch,
        src_type: TypeId,
        dst_lang: LanguageMatch,
        dst_type: TypeId,
        convert: ConvertFn,
    ) -> Self {
        MappingRule {
            src_lang,
            src_type,
            dst_lang,
            dst_type,
            convert,
            validate: None,
        }
    }

    /// Attach a validation function.
    pub fn with_validation(mut self, validate: ValidateFn) -> Self {
        self.validate = Some(validate);
        self
    }

    fn key(&self) -> RuleKey {
        RuleKey {
            src_lang: self.src_lang.clone(),
            src_type: self.src_type,
            dst_lang: self.dst_lang.clone(),
            dst_type: self.dst_type,
        }
    }
}

impl fmt::Debug for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingRule")
            .field("src_lang", &self.src_lang)
            .field("src_type", &self.src_type)
            .field("dst_lang", &self.dst_lang)
            .field("dst_type", &self.dst_type)
            .field("validated", &self.validate.is_some())
            .finish()
    }
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct RuleKey {
    src_lang: LanguageMatch,
    src_type: TypeId,
    dst_lang: LanguageMatch,
    dst_type: TypeId,
}

/// Append-only table of conversion rules.
#[derive(Default)]
pub struct ConversionTable {
    rules: Vec<MappingRule>,
    keys: FxHashSet<RuleKey>,
}

impl ConversionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table pre-loaded with the builtin primitive rules.
    ///
    /// Builtins cover identity on every primitive plus lossless numeric
    /// widening (int8→int16→int32→int64, unsigned likewise, float→double),
    /// registered under [`LanguageMatch::Any`] endpoints.
    pub fn with_builtin_rules() -> Self {
        let mut table = Self::new();
        table.register_builtin_rules();
        table
    }

    /// Register a rule.
    ///
    /// Fails with `AlreadyRegistered` on an identical
    /// `(src_lang, src_type, dst_lang, dst_type)` tuple.
    pub fn register(&mut self, rule: MappingRule) -> FfiResult<()> {
        let key = rule.key();
        if self.keys.contains(&key) {
            return Err(FfiError::AlreadyRegistered {
                kind: "conversion rule",
                name: format!(
                    "{:?}:{} -> {:?}:{}",
                    rule.src_lang, rule.src_type, rule.dst_lang, rule.dst_type
                ),
            });
        }
        self.keys.insert(key);
        self.rules.push(rule);
        Ok(())
    }

    /// Find the first rule converting the given pair.
    pub fn find(
        &self,
        src_lang: &str,
        src_type: TypeId,
        dst_lang: &str,
        dst_type: TypeId,
    ) -> FfiResult<&MappingRule> {
        self.rules
            .iter()
            .find(|r| {
                r.src_type == src_type
                    && r.dst_type == dst_type
                    && r.src_lang.matches(src_lang)
                    && r.dst_lang.matches(dst_lang)
            })
            .ok_or_else(|| FfiError::ConversionNotFound {
                src_lang: src_lang.to_string(),
                src_type,
                dst_lang: dst_lang.to_string(),
                dst_type,
            })
    }

    /// Check whether any rule converts the given pair.
    pub fn has_conversion(
        &self,
        src_lang: &str,
        src_type: TypeId,
        dst_lang: &str,
        dst_type: TypeId,
    ) -> bool {
        self.find(src_lang, src_type, dst_lang, dst_type).is_ok()
    }

    /// Resolve a rule and perform the conversion.
    ///
    /// The rule's validation function (if any) runs first unless
    /// [`ConvertFlags::SKIP_VALIDATION`] is set; failures from either stage
    /// propagate unchanged.
    pub fn convert(
        &self,
        src_lang: &str,
        src_type: TypeId,
        value: &Value,
        dst_lang: &str,
        dst_type: TypeId,
        flags: ConvertFlags,
    ) -> FfiResult<Value> {
        let rule = self.find(src_lang, src_type, dst_lang, dst_type)?;
        if !flags.contains(ConvertFlags::SKIP_VALIDATION) {
            if let Some(validate) = &rule.validate {
                validate(value)?;
            }
        }
        (rule.convert)(value, flags)
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn register_builtin_rules(&mut self) {
        use crate::type_id::PrimitiveType;

        // Identity on every primitive.
        for p in PrimitiveType::ALL {
            let ty = TypeId::from(p);
            let rule = MappingRule::new(
                LanguageMatch::Any,
                ty,
                LanguageMatch::Any,
                ty,
                Arc::new(|v: &Value, _| Ok(v.clone())),
            );
            // Fresh table, keys cannot collide.
            let _ = self.register(rule);
        }

        // Lossless numeric widening.
        let widenings: [(TypeId, TypeId, ConvertFn); 7] = [
            (
                TypeId::INT8,
                TypeId::INT16,
                Arc::new(|v, _| widen(v, |v| v.get_as::<i32>().map(|i| Value::I16(i as i16)))),
            ),
            (
                TypeId::INT16,
                TypeId::INT32,
                Arc::new(|v, _| widen(v, |v| v.get_as::<i32>().map(Value::I32))),
            ),
            (
                TypeId::INT32,
                TypeId::INT64,
                Arc::new(|v, _| widen(v, |v| v.get_as::<i64>().map(Value::I64))),
            ),
            (
                TypeId::UINT8,
                TypeId::UINT16,
                Arc::new(|v, _| widen(v, |v| v.get_as::<u64>().map(|u| Value::U16(u as u16)))),
            ),
            (
                TypeId::UINT16,
                TypeId::UINT32,
                Arc::new(|v, _| widen(v, |v| v.get_as::<u64>().map(|u| Value::U32(u as u32)))),
            ),
            (
                TypeId::UINT32,
                TypeId::UINT64,
                Arc::new(|v, _| widen(v, |v| v.get_as::<u64>().map(Value::U64))),
            ),
            (
                TypeId::FLOAT,
                TypeId::DOUBLE,
                Arc::new(|v, _| widen(v, |v| v.get_as::<f64>().map(Value::F64))),
            ),
        ];
        for (src, dst, convert) in widenings {
            let rule = MappingRule::new(
                LanguageMatch::Any,
                src,
                LanguageMatch::Any,
                dst,
                convert,
            );
            let _ = self.register(rule);
        }
    }
}

fn widen(value: &Value, f: impl Fn(&Value) -> Option<Value>) -> FfiResult<Value> {
    f(value).ok_or_else(|| FfiError::TypeMismatch {
        expected: "numeric value".to_string(),
        actual: value.type_id().to_string(),
    })
}
