//! Decoder configuration.
//!
//! A [`Config`] is a set of named options validated against a fixed schema. Every option has a
//! kind (string, integer, float or boolean) and most have a default. Callers start from
//! [`Config::default_config`] and override what they need:
//!
//! ```no_run
//! use murmur::config::Config;
//!
//! let mut config = Config::default_config();
//! config.set_str("-hmm", "model/en-us")?;
//! config.set_str("-dict", "model/cmudict-en-us.dict")?;
//! config.set_str("-lm", "model/en-us.lm")?;
//! config.set_float("-lw", 7.0)?;
//! # Ok::<(), murmur::Error>(())
//! ```
//!
//! Keys may be written with or without the leading dash. Once handed to a decoder the
//! configuration is frozen; the decoder only ever reads it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{Error, Result};

/// The kind of value an option holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Str,
    Int,
    Float,
    Bool,
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    fn kind(&self) -> Kind {
        match self {
            Value::Str(_) => Kind::Str,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Bool(_) => Kind::Bool,
        }
    }

    fn parse(kind: Kind, text: &str) -> Option<Self> {
        let text = text.trim();
        match kind {
            Kind::Str => Some(Value::Str(text.to_owned())),
            Kind::Int => text.parse().ok().map(Value::Int),
            Kind::Float => text.parse().ok().map(Value::Float),
            Kind::Bool => parse_bool(text).map(Value::Bool),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => f.write_str(if *v { "yes" } else { "no" }),
        }
    }
}

/// One entry of the option schema.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    /// Option name without the leading dash.
    pub name: &'static str,
    pub kind: Kind,
    /// Default value in textual form, or `None` when the option is unset by default.
    pub default: Option<&'static str>,
    pub doc: &'static str,
}

const fn opt(
    name: &'static str,
    kind: Kind,
    default: Option<&'static str>,
    doc: &'static str,
) -> OptionSpec {
    OptionSpec {
        name,
        kind,
        default,
        doc,
    }
}

/// The engine's option schema.
pub const SCHEMA: &[OptionSpec] = &[
    // Models.
    opt("hmm", Kind::Str, None, "Directory containing acoustic model files"),
    opt("dict", Kind::Str, None, "Main pronunciation dictionary"),
    opt("fdict", Kind::Str, None, "Filler (noise word) dictionary"),
    opt("lm", Kind::Str, None, "ARPA n-gram language model"),
    opt("mdef", Kind::Str, None, "Model definition file (defaults to <hmm>/mdef)"),
    opt("mean", Kind::Str, None, "Gaussian means (defaults to <hmm>/means)"),
    opt("var", Kind::Str, None, "Gaussian variances (defaults to <hmm>/variances)"),
    opt("mixw", Kind::Str, None, "Mixture weights (defaults to <hmm>/mixture_weights)"),
    opt("tmat", Kind::Str, None, "Transition matrices (defaults to <hmm>/transition_matrices)"),
    opt("featparams", Kind::Str, None, "Feature parameters (defaults to <hmm>/feat.params)"),
    opt("varfloor", Kind::Float, Some("0.0001"), "Gaussian variance floor"),
    opt("mixwfloor", Kind::Float, Some("0.0000001"), "Mixture weight floor"),
    opt("tmatfloor", Kind::Float, Some("0.0001"), "Transition probability floor"),
    // Frontend.
    opt("samprate", Kind::Int, Some("16000"), "Sampling rate"),
    opt("frate", Kind::Int, Some("100"), "Frame rate"),
    opt("wlen", Kind::Float, Some("0.025625"), "Hamming window length in seconds"),
    opt("nfft", Kind::Int, Some("0"), "FFT size, or 0 to choose automatically"),
    opt("nfilt", Kind::Int, Some("40"), "Number of mel filters"),
    opt("lowerf", Kind::Float, Some("133.33334"), "Lower edge of filters"),
    opt("upperf", Kind::Float, Some("6855.4976"), "Upper edge of filters"),
    opt("ncep", Kind::Int, Some("13"), "Number of cepstral coefficients"),
    opt("ceplen", Kind::Int, Some("13"), "Length of the input cepstral vector"),
    opt("alpha", Kind::Float, Some("0.97"), "Pre-emphasis coefficient"),
    opt("transform", Kind::Str, Some("legacy"), "Cepstral transform: legacy, dct or htk"),
    opt("lifter", Kind::Int, Some("0"), "Sine liftering period, or 0 for none"),
    opt("dither", Kind::Bool, Some("no"), "Add 1/2-bit noise"),
    opt("seed", Kind::Int, Some("-1"), "Dither seed; negative selects a fixed internal seed"),
    opt("remove_dc", Kind::Bool, Some("no"), "Remove DC offset from each frame"),
    opt("input_endian", Kind::Str, Some("little"), "Byte order of raw input (little or big)"),
    opt("feat", Kind::Str, Some("1s_c_d_dd"), "Feature type: 1s_c, 1s_c_d or 1s_c_d_dd"),
    opt("cmn", Kind::Str, Some("live"), "Cepstral mean normalization: none, live or batch"),
    opt("cmninit", Kind::Str, Some("40,3,-1"), "Initial cepstral mean for live CMN"),
    opt("agc", Kind::Str, Some("none"), "Automatic gain control; only none is supported"),
    opt("varnorm", Kind::Bool, Some("no"), "Cepstral variance normalization; unsupported"),
    // Search.
    opt("beam", Kind::Float, Some("1e-48"), "Beam applied to every frame"),
    opt("wbeam", Kind::Float, Some("7e-29"), "Beam applied to word exits"),
    opt("pbeam", Kind::Float, Some("1e-48"), "Beam applied to phone transitions"),
    opt("lw", Kind::Float, Some("6.5"), "Language model weight"),
    opt("wip", Kind::Float, Some("0.65"), "Word insertion penalty"),
    opt("pip", Kind::Float, Some("1.0"), "Phone insertion penalty"),
    opt("silprob", Kind::Float, Some("0.005"), "Silence word transition probability"),
    opt("fillprob", Kind::Float, Some("1e-8"), "Filler word transition probability"),
    opt("maxhmmpf", Kind::Int, Some("30000"), "Maximum active words per frame, or -1"),
    opt("maxwpf", Kind::Int, Some("-1"), "Maximum word exits per frame, or -1"),
    opt("maxnbest", Kind::Int, Some("256"), "Upper bound on N-best list length"),
    opt("ascale", Kind::Float, Some("20.0"), "Inverse acoustic scale for confidence"),
    opt("compallsen", Kind::Bool, Some("no"), "Score every senone in every frame"),
];

/// Look up an option by name, with or without the leading dash.
pub fn lookup(key: &str) -> Option<&'static OptionSpec> {
    let name = key.strip_prefix('-').unwrap_or(key);
    SCHEMA.iter().find(|spec| spec.name == name)
}

/// A validated set of decoder options.
#[derive(Debug, Clone)]
pub struct Config {
    values: BTreeMap<&'static str, Value>,
    explicit: BTreeSet<&'static str>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    /// A configuration populated with the engine defaults. Performs no I/O.
    pub fn default_config() -> Self {
        let mut values = BTreeMap::new();
        for spec in SCHEMA {
            if let Some(value) = spec.default.and_then(|d| Value::parse(spec.kind, d)) {
                values.insert(spec.name, value);
            }
        }

        Self {
            values,
            explicit: BTreeSet::new(),
        }
    }

    /// Build a configuration from command-line style `-key value` pairs on top of the defaults.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default_config();
        let mut args = args.into_iter();
        while let Some(key) = args.next() {
            let key = key.as_ref();
            let value = args
                .next()
                .ok_or_else(|| Error::config(format!("option '{key}' is missing a value")))?;
            config.set_str(key, value.as_ref())?;
        }
        Ok(config)
    }

    /// Set an option from its textual form, parsed according to the option's kind.
    pub fn set_str(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        let spec = spec_for(key)?;
        let parsed = Value::parse(spec.kind, value).ok_or_else(|| {
            Error::config(format!(
                "option '-{}' expects {}, got '{value}'",
                spec.name,
                kind_name(spec.kind)
            ))
        })?;
        self.insert(spec, parsed);
        Ok(self)
    }

    /// Set an integer option. Float options accept integers too.
    pub fn set_int(&mut self, key: &str, value: i64) -> Result<&mut Self> {
        let spec = spec_for(key)?;
        let value = match spec.kind {
            Kind::Int => Value::Int(value),
            Kind::Float => Value::Float(value as f64),
            other => return Err(kind_mismatch(spec, other, Kind::Int)),
        };
        self.insert(spec, value);
        Ok(self)
    }

    /// Set a floating point option.
    pub fn set_float(&mut self, key: &str, value: f64) -> Result<&mut Self> {
        let spec = spec_for(key)?;
        if spec.kind != Kind::Float {
            return Err(kind_mismatch(spec, spec.kind, Kind::Float));
        }
        self.insert(spec, Value::Float(value));
        Ok(self)
    }

    /// Set a boolean option.
    pub fn set_bool(&mut self, key: &str, value: bool) -> Result<&mut Self> {
        let spec = spec_for(key)?;
        if spec.kind != Kind::Bool {
            return Err(kind_mismatch(spec, spec.kind, Kind::Bool));
        }
        self.insert(spec, Value::Bool(value));
        Ok(self)
    }

    /// Read an option value, `None` when it is unset.
    pub fn get(&self, key: &str) -> Result<Option<&Value>> {
        let spec = spec_for(key)?;
        Ok(self.values.get(spec.name))
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key)? {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(read_mismatch(key, other.kind(), Kind::Str)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.get(key)? {
            Some(Value::Int(v)) => Ok(*v),
            Some(other) => Err(read_mismatch(key, other.kind(), Kind::Int)),
            None => Err(unset(key)),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        match self.get(key)? {
            Some(Value::Float(v)) => Ok(*v),
            Some(Value::Int(v)) => Ok(*v as f64),
            Some(other) => Err(read_mismatch(key, other.kind(), Kind::Float)),
            None => Err(unset(key)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get(key)? {
            Some(Value::Bool(v)) => Ok(*v),
            Some(other) => Err(read_mismatch(key, other.kind(), Kind::Bool)),
            None => Err(unset(key)),
        }
    }

    /// Whether the caller set this option (as opposed to it holding a default).
    pub fn is_explicit(&self, key: &str) -> bool {
        lookup(key).is_some_and(|spec| self.explicit.contains(spec.name))
    }

    /// Iterate over every option that currently has a value.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// Merge an acoustic model's `feat.params` text.
    ///
    /// Lines hold `-key value` pairs. Options the caller set explicitly win; unknown keys are
    /// skipped because model directories often carry parameters for other tools.
    pub(crate) fn merge_feat_params(&mut self, text: &str) -> Result<()> {
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Some(spec) = lookup(key) else {
                tracing::warn!(key, value, "ignoring unknown feat.params option");
                continue;
            };
            if self.explicit.contains(spec.name) {
                continue;
            }
            let parsed = Value::parse(spec.kind, value).ok_or_else(|| {
                Error::config(format!(
                    "feat.params option '-{}' expects {}, got '{value}'",
                    spec.name,
                    kind_name(spec.kind)
                ))
            })?;
            self.values.insert(spec.name, parsed);
        }
        Ok(())
    }

    fn insert(&mut self, spec: &'static OptionSpec, value: Value) {
        self.values.insert(spec.name, value);
        self.explicit.insert(spec.name);
    }
}

fn spec_for(key: &str) -> Result<&'static OptionSpec> {
    lookup(key).ok_or_else(|| Error::InvalidKey(key.to_owned()))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Str => "a string",
        Kind::Int => "an integer",
        Kind::Float => "a number",
        Kind::Bool => "a boolean",
    }
}

fn kind_mismatch(spec: &OptionSpec, actual: Kind, given: Kind) -> Error {
    Error::config(format!(
        "option '-{}' holds {}, cannot set it to {}",
        spec.name,
        kind_name(actual),
        kind_name(given)
    ))
}

fn read_mismatch(key: &str, actual: Kind, wanted: Kind) -> Error {
    Error::config(format!(
        "option '{key}' holds {}, not {}",
        kind_name(actual),
        kind_name(wanted)
    ))
}

fn unset(key: &str) -> Error {
    Error::config(format!("option '{key}' has no value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_populated() -> anyhow::Result<()> {
        let config = Config::default_config();
        assert_eq!(config.get_int("-samprate")?, 16_000);
        assert_eq!(config.get_str("-feat")?, Some("1s_c_d_dd"));
        assert!(!config.get_bool("-dither")?);
        assert_eq!(config.get_str("-hmm")?, None);
        assert!((config.get_float("beam")? - 1e-48).abs() < 1e-60);
        Ok(())
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut config = Config::default_config();
        let err = config.set_str("-nonsense", "1").unwrap_err();
        assert!(matches!(err, Error::InvalidKey(ref k) if k == "-nonsense"));
        assert!(err.is_setup_error());
    }

    #[test]
    fn set_str_parses_by_kind() -> anyhow::Result<()> {
        let mut config = Config::default_config();
        config.set_str("-lw", "7.5")?.set_str("maxwpf", "20")?;
        config.set_str("-remove_dc", "yes")?;
        assert_eq!(config.get_float("-lw")?, 7.5);
        assert_eq!(config.get_int("-maxwpf")?, 20);
        assert!(config.get_bool("-remove_dc")?);

        let err = config.set_str("-samprate", "fast").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        Ok(())
    }

    #[test]
    fn typed_setters_check_kind() -> anyhow::Result<()> {
        let mut config = Config::default_config();
        config.set_int("-lw", 8)?;
        assert_eq!(config.get_float("-lw")?, 8.0);

        assert!(config.set_float("-samprate", 8000.0).is_err());
        assert!(config.set_bool("-hmm", true).is_err());
        assert!(config.set_int("-dither", 1).is_err());
        Ok(())
    }

    #[test]
    fn from_args_applies_pairs() -> anyhow::Result<()> {
        let config = Config::from_args(["-hmm", "/models/en", "-wip", "0.5"])?;
        assert_eq!(config.get_str("hmm")?, Some("/models/en"));
        assert_eq!(config.get_float("-wip")?, 0.5);
        assert!(config.is_explicit("-hmm"));
        assert!(!config.is_explicit("-lw"));

        assert!(Config::from_args(["-hmm"]).is_err());
        Ok(())
    }

    #[test]
    fn feat_params_do_not_override_explicit_options() -> anyhow::Result<()> {
        let mut config = Config::default_config();
        config.set_int("-nfilt", 20)?;
        config.merge_feat_params("-nfilt 25\n-lowerf 200\n-agc none\n\n-upperf 3500\n")?;
        assert_eq!(config.get_int("-nfilt")?, 20);
        assert_eq!(config.get_float("-lowerf")?, 200.0);
        assert_eq!(config.get_float("-upperf")?, 3500.0);
        Ok(())
    }

    #[test]
    fn feat_params_carry_the_cepstral_transform() -> anyhow::Result<()> {
        let mut config = Config::default_config();
        assert_eq!(config.get_str("-transform")?, Some("legacy"));
        config.merge_feat_params("-transform dct\n-lifter 22\n-svspec 0-12\n")?;
        assert_eq!(config.get_str("-transform")?, Some("dct"));
        assert_eq!(config.get_int("-lifter")?, 22);
        Ok(())
    }
}
