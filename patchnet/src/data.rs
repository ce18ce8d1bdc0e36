//! 从`.mat`文件读取训练与推理所需的图像块。

use crate::error::{Error, Result};
use crate::mat::MatFile;
use ndarray::{concatenate, s, Array2, Array5, ArrayD, Axis, Ix4, Ix5};
use rand::Rng;
use std::path::Path;

/// 邻域灰度图像块所在的变量名。
pub const INTENSITY_VARIABLE: &str = "nbor_int_all";

/// 匹配代价输出的变量名。
pub const COST_VARIABLE: &str = "pair_cost";

/// 第`i`帧（从1开始）的邻域灰度数据文件名。
#[inline]
pub fn intensity_file_name(i: usize) -> String {
    format!("{INTENSITY_VARIABLE}_{i}.mat")
}

/// 第`i`帧（从1开始）的匹配代价输出文件名。
#[inline]
pub fn cost_file_name(i: usize) -> String {
    format!("nbors_cost_{i}.mat")
}

/// 带标签图像块文件中的变量名，以及整数类别号的起始值。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchVars {
    pub x: String,
    pub y: String,
    /// 整数标签中最小的类别号，MATLAB导出的标签通常从1开始。
    pub first_label: usize,
}

impl Default for PatchVars {
    fn default() -> Self {
        Self {
            x: "x".to_string(),
            y: "y".to_string(),
            first_label: 0,
        }
    }
}

/// 带标签的图像块：`x`为`(N, 1, D, H, W)`，`y`为one-hot的`(N, classes)`。
#[derive(Clone, Debug)]
pub struct LabeledPatches {
    pub x: Array5<f32>,
    pub y: Array2<f32>,
}

impl LabeledPatches {
    pub fn new(x: Array5<f32>, y: Array2<f32>) -> Result<Self> {
        if x.len_of(Axis(0)) != y.nrows() {
            return Err(Error::Shape(format!(
                "图像块{}个，标签{}个",
                x.len_of(Axis(0)),
                y.nrows()
            )));
        }
        Ok(Self { x, y })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.y.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn classes(&self) -> usize {
        self.y.ncols()
    }

    /// 单个图像块的形状`(C, D, H, W)`。
    #[inline]
    pub fn patch_shape(&self) -> &[usize] {
        &self.x.shape()[1..]
    }

    /// 按样本维拼接。各部分的图像块形状与类别数必须一致。
    pub fn concat(parts: &[LabeledPatches]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| Error::Shape("没有可以拼接的数据".to_string()))?;
        for p in &parts[1..] {
            if p.patch_shape() != first.patch_shape() || p.classes() != first.classes() {
                return Err(Error::Shape(format!(
                    "无法拼接：图像块{:?}/{:?}，类别{}/{}",
                    first.patch_shape(),
                    p.patch_shape(),
                    first.classes(),
                    p.classes()
                )));
            }
        }
        let xs: Vec<_> = parts.iter().map(|p| p.x.view()).collect();
        let ys: Vec<_> = parts.iter().map(|p| p.y.view()).collect();
        Self::new(concatenate(Axis(0), &xs)?, concatenate(Axis(0), &ys)?)
    }

    /// 有放回地均匀抽取`n`个样本；`n == 0`时保留全部。
    pub fn resample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Self> {
        if n == 0 {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Err(Error::Shape("不能从空数据集中抽样".to_string()));
        }
        let len = self.len();
        let idx: Vec<usize> = (0..n).map(|_| rng.gen_range(0..len)).collect();
        Self::new(self.x.select(Axis(0), &idx), self.y.select(Axis(0), &idx))
    }
}

fn patches_from(arr: ArrayD<f32>, name: &str) -> Result<Array5<f32>> {
    match arr.ndim() {
        4 => Ok(arr.into_dimensionality::<Ix4>()?.insert_axis(Axis(1))),
        5 if arr.shape()[1] == 1 => Ok(arr.into_dimensionality::<Ix5>()?),
        _ => Err(Error::Shape(format!(
            "变量`{name}`应为(N, D, H, W)或(N, 1, D, H, W)，实际为{:?}",
            arr.shape()
        ))),
    }
}

/// 文件中原样读出的标签。整数类别号要等到确定全部数据的类别数后再编码。
#[derive(Clone, Debug)]
enum RawLabels {
    OneHot(Array2<f32>),
    Ids(Vec<usize>),
}

impl RawLabels {
    /// 标签可以是one-hot的`(N, C)`，也可以是`(N, 1)`或`(1, N)`的整数类别号。
    fn read(arr: ArrayD<f32>, n: usize, name: &str, first_label: usize) -> Result<Self> {
        let shape = arr.shape().to_vec();
        match shape[..] {
            [rows, cols] if rows == n && cols > 1 => Ok(RawLabels::OneHot(arr.into_dimensionality()?)),
            [rows, cols] if (rows == n && cols == 1) || (rows == 1 && cols == n) => {
                let ids = arr
                    .iter()
                    .map(|&v| {
                        if v >= first_label as f32 && v.fract() == 0.0 {
                            Ok(v as usize - first_label)
                        } else {
                            Err(Error::Shape(format!(
                                "变量`{name}`中的类别号{v}无效（最小类别号为{first_label}）"
                            )))
                        }
                    })
                    .collect::<Result<Vec<usize>>>()?;
                Ok(RawLabels::Ids(ids))
            }
            _ => Err(Error::Shape(format!(
                "变量`{name}`的形状{shape:?}与样本数{n}不符"
            ))),
        }
    }

    /// 至少需要的类别数。
    fn classes(&self) -> usize {
        match self {
            RawLabels::OneHot(y) => y.ncols(),
            RawLabels::Ids(ids) => ids.iter().max().map_or(0, |&m| m + 1),
        }
    }

    /// 编码为`classes`列的one-hot矩阵。
    fn to_one_hot(&self, classes: usize) -> Result<Array2<f32>> {
        if self.classes() > classes {
            return Err(Error::Shape(format!(
                "标签需要{}类，超出了{classes}类",
                self.classes()
            )));
        }
        match self {
            RawLabels::OneHot(y) if y.ncols() == classes => Ok(y.clone()),
            RawLabels::OneHot(y) => {
                let mut out = Array2::zeros((y.nrows(), classes));
                out.slice_mut(s![.., ..y.ncols()]).assign(y);
                Ok(out)
            }
            RawLabels::Ids(ids) => {
                let mut y = Array2::zeros((ids.len(), classes));
                for (i, &c) in ids.iter().enumerate() {
                    y[[i, c]] = 1.0;
                }
                Ok(y)
            }
        }
    }
}

fn read_group(src: &Path, name: &str, vars: &PatchVars) -> Result<(Array5<f32>, RawLabels)> {
    let path = src.join(format!("{name}.mat"));
    let mut mat = MatFile::open(&path)?;
    let x = patches_from(mat.take(&vars.x)?.to_f32()?, &vars.x)?;
    let n = x.len_of(Axis(0));
    let y = RawLabels::read(mat.take(&vars.y)?.to_f32()?, n, &vars.y, vars.first_label)?;
    log::info!(
        "`{}`: {n}个图像块，形状{:?}，{}类",
        path.display(),
        &x.shape()[1..],
        y.classes()
    );
    Ok((x, y))
}

/// 读取`<src>/<name>.mat`中的带标签图像块。整数标签的类别数由本文件中最大的类别号决定。
pub fn load_labeled_patches<P: AsRef<Path>>(
    src: P,
    name: &str,
    vars: &PatchVars,
) -> Result<LabeledPatches> {
    let (x, raw) = read_group(src.as_ref(), name, vars)?;
    let y = raw.to_one_hot(raw.classes())?;
    LabeledPatches::new(x, y)
}

/// 读取`<stem><id>`命名的若干组训练数据并拼接，另读取一组测试数据。
///
/// 类别数取所有训练组与测试组中的最大值，各组按同一类别数编码。
pub fn create_train_test_set<P: AsRef<Path>>(
    src: P,
    stem: &str,
    train_ids: &[u32],
    test_id: u32,
    vars: &PatchVars,
) -> Result<(LabeledPatches, LabeledPatches)> {
    let src = src.as_ref();
    let groups = train_ids
        .iter()
        .map(|id| read_group(src, &format!("{stem}{id}"), vars))
        .collect::<Result<Vec<_>>>()?;
    let (test_x, test_raw) = read_group(src, &format!("{stem}{test_id}"), vars)?;
    let classes = groups
        .iter()
        .map(|(_, raw)| raw.classes())
        .chain([test_raw.classes()])
        .max()
        .unwrap_or(0);

    let parts = groups
        .into_iter()
        .map(|(x, raw)| LabeledPatches::new(x, raw.to_one_hot(classes)?))
        .collect::<Result<Vec<_>>>()?;
    let train = LabeledPatches::concat(&parts)?;
    let test = LabeledPatches::new(test_x, test_raw.to_one_hot(classes)?)?;
    if test.patch_shape() != train.patch_shape() {
        return Err(Error::Shape(format!(
            "测试集图像块形状{:?}与训练集{:?}不同",
            test.patch_shape(),
            train.patch_shape()
        )));
    }
    log::info!("训练集{}个，测试集{}个，共{classes}类", train.len(), test.len());
    Ok((train, test))
}

/// 读取`path`中变量`variable`的图像块，返回`(N, 1, D, H, W)`。
pub fn load_patches<P: AsRef<Path>>(path: P, variable: &str) -> Result<Array5<f32>> {
    let arr = MatFile::open(path)?.take(variable)?.to_f32()?;
    patches_from(arr, variable)
}

/// 读取一帧的邻域对数据`(N, 2, D, H, W)`，拆分为左右两组`(N, 1, D, H, W)`。
pub fn load_pair_frame<P: AsRef<Path>>(path: P, variable: &str) -> Result<(Array5<f32>, Array5<f32>)> {
    let arr = MatFile::open(path)?.take(variable)?.to_f32()?;
    if !matches!(arr.shape(), [_, 2, _, _, _]) {
        return Err(Error::Shape(format!(
            "变量`{variable}`应为(N, 2, D, H, W)，实际为{:?}",
            arr.shape()
        )));
    }
    let pairs = arr.into_dimensionality::<Ix5>()?;
    let left = pairs.slice(s![.., 0..1, .., .., ..]).to_owned();
    let right = pairs.slice(s![.., 1..2, .., .., ..]).to_owned();
    Ok((left, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mat::MatWriter;
    use ndarray::{arr2, Array4};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn write_group(dir: &Path, name: &str, n: usize, y: ArrayD<f64>) {
        let x = Array4::from_shape_fn((n, 3, 4, 5), |(i, a, b, c)| (i * 100 + a * 20 + b * 5 + c) as f32);
        let mut w = MatWriter::new();
        w.add("x", &x).unwrap().add("y", &y).unwrap();
        w.save(dir.join(format!("{name}.mat"))).unwrap();
    }

    #[test]
    fn test_file_names() {
        assert_eq!(intensity_file_name(1), "nbor_int_all_1.mat");
        assert_eq!(cost_file_name(12), "nbors_cost_12.mat");
    }

    #[test]
    fn test_load_one_hot_and_integer_labels() {
        let dir = tempfile::tempdir().unwrap();
        let one_hot = arr2(&[[1.0, 0.0], [0.0, 1.0], [0.0, 1.0]]).into_dyn();
        write_group(dir.path(), "g_1", 3, one_hot);
        let ids = arr2(&[[2.0, 0.0]]).into_dyn();
        write_group(dir.path(), "g_2", 2, ids);

        let vars = PatchVars::default();
        let a = load_labeled_patches(dir.path(), "g_1", &vars).unwrap();
        assert_eq!(a.x.shape(), &[3, 1, 3, 4, 5]);
        assert_eq!(a.x[[2, 0, 1, 2, 3]], 200.0 + 20.0 + 10.0 + 3.0);
        assert_eq!(a.classes(), 2);

        let b = load_labeled_patches(dir.path(), "g_2", &vars).unwrap();
        assert_eq!(b.y, arr2(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]));

        // 类别数不同不能拼接
        assert!(LabeledPatches::concat(&[a.clone(), b]).is_err());
        let both = LabeledPatches::concat(&[a.clone(), a]).unwrap();
        assert_eq!(both.len(), 6);
    }

    #[test]
    fn test_label_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_group(dir.path(), "bad", 3, arr2(&[[1.0, 0.0], [0.0, 1.0]]).into_dyn());
        let err = load_labeled_patches(dir.path(), "bad", &PatchVars::default());
        assert!(matches!(err, Err(Error::Shape(_))));

        write_group(dir.path(), "neg", 2, arr2(&[[1.0], [-1.0]]).into_dyn());
        assert!(load_labeled_patches(dir.path(), "neg", &PatchVars::default()).is_err());

        let vars = PatchVars {
            x: "patches".to_string(),
            ..PatchVars::default()
        };
        let err = load_labeled_patches(dir.path(), "neg", &vars);
        assert!(matches!(err, Err(Error::MissingVariable(_))));
    }

    #[test]
    fn test_create_train_test_set_and_resample() {
        let dir = tempfile::tempdir().unwrap();
        for (id, n) in [(1, 2), (2, 3), (3, 4)] {
            let y = ArrayD::from_shape_fn(vec![n, 1], |i| (i[0] % 2) as f64);
            write_group(dir.path(), &format!("set_{id}"), n, y);
        }
        let (train, test) =
            create_train_test_set(dir.path(), "set_", &[1, 3], 2, &PatchVars::default()).unwrap();
        assert_eq!(train.len(), 6);
        assert_eq!(test.len(), 3);
        assert_eq!(train.x[[2, 0, 0, 0, 0]], 0.0);

        let mut rng = StdRng::seed_from_u64(8);
        let sampled = train.resample(20, &mut rng).unwrap();
        assert_eq!(sampled.len(), 20);
        assert_eq!(sampled.patch_shape(), train.patch_shape());
        assert_eq!(train.resample(0, &mut rng).unwrap().len(), 6);

        assert!(create_train_test_set(dir.path(), "set_", &[1, 9], 2, &PatchVars::default()).is_err());
    }

    #[test]
    fn test_integer_labels_share_class_count() {
        let dir = tempfile::tempdir().unwrap();
        write_group(dir.path(), "g_1", 3, arr2(&[[0.0], [1.0], [2.0]]).into_dyn());
        write_group(dir.path(), "g_2", 2, arr2(&[[0.0], [1.0]]).into_dyn());
        write_group(dir.path(), "g_3", 2, arr2(&[[2.0, 0.0]]).into_dyn());

        // g_2单独读取只有2类
        let vars = PatchVars::default();
        assert_eq!(load_labeled_patches(dir.path(), "g_2", &vars).unwrap().classes(), 2);

        let (train, test) = create_train_test_set(dir.path(), "g_", &[1, 2], 3, &vars).unwrap();
        assert_eq!(train.classes(), 3);
        assert_eq!(test.classes(), 3);
        assert_eq!(train.len(), 5);
        assert_eq!(train.y.row(4).to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(test.y, arr2(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]));

        // 只有测试集含有最大的类别号时同样以它为准
        let (train, test) = create_train_test_set(dir.path(), "g_", &[2], 3, &vars).unwrap();
        assert_eq!((train.classes(), test.classes()), (3, 3));
    }

    #[test]
    fn test_one_based_labels() {
        let dir = tempfile::tempdir().unwrap();
        write_group(dir.path(), "m_1", 3, arr2(&[[1.0], [2.0], [2.0]]).into_dyn());
        write_group(dir.path(), "m_2", 2, arr2(&[[3.0, 1.0]]).into_dyn());
        let vars = PatchVars {
            first_label: 1,
            ..PatchVars::default()
        };
        let (train, test) = create_train_test_set(dir.path(), "m_", &[1], 2, &vars).unwrap();
        assert_eq!(train.classes(), 3);
        assert_eq!(train.y, arr2(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, 0.0]]));
        assert_eq!(test.y, arr2(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]));

        // 类别号0小于起始值
        write_group(dir.path(), "m_3", 2, arr2(&[[0.0], [1.0]]).into_dyn());
        let err = load_labeled_patches(dir.path(), "m_3", &vars);
        assert!(matches!(err, Err(Error::Shape(_))));
    }

    #[test]
    fn test_load_pair_frame() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = Array5::from_shape_fn((3, 2, 2, 3, 4), |(n, p, a, b, c)| {
            (n * 1000 + p * 100 + a * 12 + b * 4 + c) as f32
        });
        let path = dir.path().join(intensity_file_name(1));
        MatWriter::new()
            .add(INTENSITY_VARIABLE, &pairs)
            .unwrap()
            .save(&path)
            .unwrap();

        let (left, right) = load_pair_frame(&path, INTENSITY_VARIABLE).unwrap();
        assert_eq!(left.shape(), &[3, 1, 2, 3, 4]);
        assert_eq!(left[[1, 0, 1, 2, 3]], 1000.0 + 12.0 + 8.0 + 3.0);
        assert_eq!(right[[1, 0, 1, 2, 3]], 1100.0 + 12.0 + 8.0 + 3.0);

        assert!(load_pair_frame(&path, "other").is_err());
        // 两个通道的数据不能作为单通道图像块读取
        assert!(matches!(load_patches(&path, INTENSITY_VARIABLE), Err(Error::Shape(_))));
    }
}
