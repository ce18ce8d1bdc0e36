//! 模型的保存与读取。
//!
//! 一个模型保存为一个目录：`model.json`描述网络类型与结构参数，
//! `weights.mpk`是`burn`按字段名记录的全精度参数。

use super::{
    Classifier, ClassifierConfig, ClassifierNet, Encoder, EncoderConfig, EncoderNet, Matcher,
};
use crate::error::{Error, Result};
use crate::nn::{device, InferBackend, TrainBackend};
use burn::module::Module;
use burn::record::{DefaultFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use json::{object, JsonValue};
use std::fs;
use std::path::Path;

pub const MANIFEST_FILE: &str = "model.json";
pub const WEIGHTS_FILE: &str = "weights.mpk";
/// 记录器会自动补上扩展名。
const WEIGHTS_STEM: &str = "weights";
const FORMAT_VERSION: usize = 2;

/// 模型目录中保存的网络类型。
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModelKind {
    Encoder,
    Classifier,
    Matcher,
}

impl ModelKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Encoder => "encoder",
            ModelKind::Classifier => "classifier",
            ModelKind::Matcher => "matcher",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "encoder" => Some(ModelKind::Encoder),
            "classifier" => Some(ModelKind::Classifier),
            "matcher" => Some(ModelKind::Matcher),
            _ => None,
        }
    }
}

#[inline]
fn recorder() -> DefaultFileRecorder<FullPrecisionSettings> {
    DefaultFileRecorder::new()
}

fn write_weights<B: Backend, M: Module<B>>(dir: &Path, module: M) -> Result<()> {
    module
        .save_file(dir.join(WEIGHTS_STEM), &recorder())
        .map_err(|e| Error::Record(format!("{e:?}")))
}

fn read_weights<B: Backend, M: Module<B>>(dir: &Path, module: M, device: &B::Device) -> Result<M> {
    module
        .load_file(dir.join(WEIGHTS_STEM), &recorder(), device)
        .map_err(|e| Error::Record(format!("{e:?}")))
}

fn write_manifest(
    dir: &Path,
    kind: ModelKind,
    encoder: &EncoderConfig,
    head: Option<&ClassifierConfig>,
) -> Result<()> {
    let mut manifest = object! {
        "format": FORMAT_VERSION,
        "kind": kind.as_str(),
        "input_shape": encoder.input_shape.to_vec(),
        "dropout": encoder.dropout,
    };
    if let Some(head) = head {
        manifest["classes"] = head.classes.into();
        manifest["hidden"] = head.hidden.into();
    }
    fs::write(dir.join(MANIFEST_FILE), manifest.pretty(2))?;
    Ok(())
}

fn field(manifest: &JsonValue, key: &str) -> Result<usize> {
    manifest[key]
        .as_usize()
        .ok_or_else(|| Error::Manifest(format!("缺少非负整数字段`{key}`: {}", manifest.dump())))
}

/// 读取`model.json`，返回网络类型、编码器参数与分类头参数（仅分类网络有）。
fn read_manifest(dir: &Path) -> Result<(ModelKind, EncoderConfig, Option<ClassifierConfig>)> {
    let text = fs::read_to_string(dir.join(MANIFEST_FILE))?;
    let manifest = json::parse(&text)?;
    if field(&manifest, "format")? != FORMAT_VERSION {
        return Err(Error::Manifest(format!(
            "不支持的格式版本{}",
            manifest["format"]
        )));
    }
    let kind = manifest["kind"]
        .as_str()
        .and_then(ModelKind::parse)
        .ok_or_else(|| Error::Manifest(format!("未知的模型类型{}", manifest["kind"])))?;
    let input_shape = manifest["input_shape"]
        .members()
        .map(JsonValue::as_usize)
        .collect::<Option<Vec<usize>>>()
        .ok_or_else(|| Error::Manifest("`input_shape`无效".to_string()))?;
    let dropout = manifest["dropout"]
        .as_f64()
        .filter(|p| (0.0..1.0).contains(p))
        .ok_or_else(|| Error::Manifest("`dropout`无效".to_string()))?;
    let encoder = EncoderConfig::from_shape(&input_shape)
        .map_err(|e| Error::Manifest(e.to_string()))?
        .with_dropout(dropout);

    let head = match kind {
        ModelKind::Classifier => Some(
            ClassifierConfig::new(encoder.clone(), field(&manifest, "classes")?)
                .with_hidden(field(&manifest, "hidden")?),
        ),
        ModelKind::Encoder | ModelKind::Matcher => None,
    };
    Ok((kind, encoder, head))
}

fn save_net(dir: &Path, kind: ModelKind, encoder: &Encoder) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_manifest(dir, kind, encoder.config(), None)?;
    write_weights::<InferBackend, _>(dir, encoder.net().clone())?;
    log::info!("模型({})已保存到`{}`", kind.as_str(), dir.display());
    Ok(())
}

/// 保存编码器。
pub fn save_encoder<P: AsRef<Path>>(dir: P, encoder: &Encoder) -> Result<()> {
    save_net(dir.as_ref(), ModelKind::Encoder, encoder)
}

/// 读取编码器。分类网络目录也可以读取，此时只取其编码器部分。
pub fn load_encoder<P: AsRef<Path>>(dir: P) -> Result<Encoder> {
    let dir = dir.as_ref();
    let (kind, config, head) = read_manifest(dir)?;
    let device = device();
    let net = match head {
        Some(head) => {
            let net: ClassifierNet<InferBackend> = head.init(&device)?;
            read_weights::<InferBackend, _>(dir, net, &device)?.into_encoder()
        }
        None => {
            let net: EncoderNet<InferBackend> = config.init(&device)?;
            read_weights::<InferBackend, _>(dir, net, &device)?
        }
    };
    log::debug!(
        "读取模型`{}`({})，参数{}个",
        dir.display(),
        kind.as_str(),
        net.num_params()
    );
    Ok(Encoder::from_parts(config, net, device))
}

/// 读取孪生匹配网络。只保存了编码器的目录同样可以作为匹配网络使用。
pub fn load_matcher<P: AsRef<Path>>(dir: P) -> Result<Matcher> {
    Ok(Matcher::new(load_encoder(dir)?))
}

impl Classifier {
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let config = self.config();
        write_manifest(dir, ModelKind::Classifier, &config.encoder, Some(config))?;
        write_weights::<TrainBackend, _>(dir, self.net().clone())?;
        log::info!("模型(classifier)已保存到`{}`", dir.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let (kind, _, head) = read_manifest(dir)?;
        let head = head.ok_or_else(|| {
            Error::Manifest(format!(
                "`{}`中保存的是{}而不是classifier",
                dir.display(),
                kind.as_str()
            ))
        })?;
        let device = device();
        let net: ClassifierNet<TrainBackend> = head.init(&device)?;
        let net = read_weights::<TrainBackend, _>(dir, net, &device)?;
        Ok(Classifier::from_parts(head, net, device))
    }
}

impl Matcher {
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        save_net(dir.as_ref(), ModelKind::Matcher, self.encoder())
    }
}
