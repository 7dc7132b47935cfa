//! Read-only model data shared by every decoding session.
//!
//! [`Models::load`] resolves the files a [`Config`] names, parses them and checks that they agree
//! with each other and with the configured frontend. The result is wrapped in an `Arc` so
//! sessions on different threads can share it without copying.

pub mod dict;
pub mod gauden;
pub mod lexicon;
pub mod mdef;
pub mod ngram;
pub mod tmat;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::frontend::FrontendConfig;
use crate::scorer::{AcousticScorer, GmmScorer};
use crate::search::SearchParams;
use crate::{Error, Result};

use dict::Dictionary;
use gauden::{Gaussians, MixtureWeights};
use lexicon::Lexicon;
use mdef::ModelDef;
use ngram::NgramModel;
use tmat::TransitionMatrices;

pub struct Models {
    config: Config,
    frontend: FrontendConfig,
    search: SearchParams,
    mdef: ModelDef,
    tmats: TransitionMatrices,
    scorer: Box<dyn AcousticScorer>,
    lm: NgramModel,
    lexicon: Lexicon,
}

impl std::fmt::Debug for Models {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Models")
            .field("phones", &self.mdef.phones().len())
            .field("senones", &self.scorer.n_senones())
            .field("words", &self.lexicon.len())
            .field("lm_order", &self.lm.order())
            .finish()
    }
}

/// File locations resolved from a configuration.
struct ModelPaths {
    mdef: PathBuf,
    mean: PathBuf,
    var: PathBuf,
    mixw: PathBuf,
    tmat: PathBuf,
    featparams: Option<PathBuf>,
    dict: PathBuf,
    fdict: Option<PathBuf>,
    lm: PathBuf,
}

impl ModelPaths {
    fn resolve(config: &Config) -> Result<Self> {
        let hmm = required(config, "hmm")?;
        let hmm = Path::new(hmm);
        if !hmm.is_dir() {
            return Err(Error::config(format!(
                "acoustic model directory '{}' does not exist",
                hmm.display()
            )));
        }

        let in_hmm = |key: &str, default: &str| -> Result<PathBuf> {
            let path = match config.get_str(key)? {
                Some(p) => PathBuf::from(p),
                None => hmm.join(default),
            };
            must_exist(key, path)
        };
        let optional_in_hmm = |key: &str, default: &str| -> Result<Option<PathBuf>> {
            match config.get_str(key)? {
                Some(p) => must_exist(key, PathBuf::from(p)).map(Some),
                None => {
                    let p = hmm.join(default);
                    Ok(p.is_file().then_some(p))
                }
            }
        };

        Ok(Self {
            mdef: in_hmm("mdef", "mdef")?,
            mean: in_hmm("mean", "means")?,
            var: in_hmm("var", "variances")?,
            mixw: in_hmm("mixw", "mixture_weights")?,
            tmat: in_hmm("tmat", "transition_matrices")?,
            featparams: optional_in_hmm("featparams", "feat.params")?,
            fdict: optional_in_hmm("fdict", "noisedict")?,
            dict: must_exist("dict", PathBuf::from(required(config, "dict")?))?,
            lm: must_exist("lm", PathBuf::from(required(config, "lm")?))?,
        })
    }
}

fn required<'a>(config: &'a Config, key: &str) -> Result<&'a str> {
    config
        .get_str(key)?
        .ok_or_else(|| Error::config(format!("required option '-{key}' is not set")))
}

fn must_exist(key: &str, path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(Error::config(format!(
            "file for '-{key}' not found: {}",
            path.display()
        )))
    }
}

impl Models {
    /// Load every model file named by `config`.
    pub fn load(config: &Config) -> Result<Arc<Self>> {
        let paths = ModelPaths::resolve(config)?;

        let mut config = config.clone();
        if let Some(path) = &paths.featparams {
            let text = fs::read_to_string(path).map_err(|e| Error::model_load(path, e.to_string()))?;
            config.merge_feat_params(&text)?;
        }

        let mdef = ModelDef::load(&paths.mdef)?;
        let tmats = TransitionMatrices::load(&paths.tmat, config.get_float("tmatfloor")? as f32)?;
        let gaussians = Gaussians::load(&paths.mean, &paths.var, config.get_float("varfloor")? as f32)?;
        let weights = MixtureWeights::load(&paths.mixw, config.get_float("mixwfloor")? as f32)?;
        if weights.n_senones() != mdef.n_senones() {
            return Err(Error::model_load(
                &paths.mixw,
                format!(
                    "{} senones in mixture weights but {} in the model definition",
                    weights.n_senones(),
                    mdef.n_senones()
                ),
            ));
        }
        let scorer = GmmScorer::new(gaussians, weights)
            .map_err(|e| Error::model_load(&paths.mean, e.to_string()))?;

        let dict = Dictionary::load(&paths.dict, paths.fdict.as_deref(), &mdef)?;
        let lm = NgramModel::load(&paths.lm)?;
        let lexicon =
            Lexicon::build(&dict, &lm).map_err(|message| Error::model_load(&paths.lm, message))?;

        let models = Self::from_parts(config, mdef, tmats, Box::new(scorer), lm, lexicon)
            .map_err(|e| match e {
                Error::Message(message) => Error::model_load(&paths.mdef, message),
                other => other,
            })?;

        info!(
            phones = models.mdef.phones().len(),
            triphones = models.mdef.n_triphones(),
            senones = models.scorer.n_senones(),
            dictionary_words = dict.len(),
            lexicon_words = models.lexicon.len(),
            lm_order = models.lm.order(),
            lm_words = models.lm.len(),
            "loaded models"
        );
        Ok(Arc::new(models))
    }

    /// Assemble models from already-built parts, e.g. a custom [`AcousticScorer`].
    ///
    /// Checks that the parts agree with each other and with the configured frontend.
    pub fn from_parts(
        config: Config,
        mdef: ModelDef,
        tmats: TransitionMatrices,
        scorer: Box<dyn AcousticScorer>,
        lm: NgramModel,
        lexicon: Lexicon,
    ) -> Result<Self> {
        let frontend = FrontendConfig::from_config(&config)?;
        let search = SearchParams::from_config(&config)?;

        if tmats.len() < mdef.n_tmat() {
            return Err(Error::msg(format!(
                "model definition uses {} transition matrices but only {} were loaded",
                mdef.n_tmat(),
                tmats.len()
            )));
        }
        if tmats.n_states() != mdef.n_emit_state() {
            return Err(Error::msg(format!(
                "transition matrices have {} states but phones have {}",
                tmats.n_states(),
                mdef.n_emit_state()
            )));
        }
        if scorer.n_senones() < mdef.n_senones() {
            return Err(Error::msg(format!(
                "scorer has {} senones but the model definition uses {}",
                scorer.n_senones(),
                mdef.n_senones()
            )));
        }
        if scorer.feature_len() != frontend.feature_len() {
            return Err(Error::config(format!(
                "frontend produces {}-dimensional features but the acoustic model expects {}",
                frontend.feature_len(),
                scorer.feature_len()
            )));
        }

        Ok(Self {
            config,
            frontend,
            search,
            mdef,
            tmats,
            scorer,
            lm,
            lexicon,
        })
    }

    /// The effective configuration, including merged `feat.params`.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn frontend_config(&self) -> &FrontendConfig {
        &self.frontend
    }

    pub fn search_params(&self) -> &SearchParams {
        &self.search
    }

    pub fn mdef(&self) -> &ModelDef {
        &self.mdef
    }

    pub fn tmats(&self) -> &TransitionMatrices {
        &self.tmats
    }

    pub fn scorer(&self) -> &dyn AcousticScorer {
        self.scorer.as_ref()
    }

    pub fn lm(&self) -> &NgramModel {
        &self.lm
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }
}
