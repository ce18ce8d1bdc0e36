use anyhow::Context;
use clap::Args;
use patchnet::prelude::*;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Args, Debug)]
pub struct MatInfo {
    /// `.mat`文件，或者包含`.mat`文件的目录（递归查找）。
    path: PathBuf,
}

impl MatInfo {
    pub fn run(&mut self) -> anyhow::Result<()> {
        if self.path.is_file() {
            print!("{}", describe(&self.path)?);
            return Ok(());
        }
        let files = mat_files(&self.path)?;
        println!("共{}个.mat文件", files.len());
        for file in files {
            // 单个文件解析失败不影响其余文件
            match describe(&file) {
                Ok(s) => print!("{s}"),
                Err(e) => log::warn!("跳过`{}`: {e:#}", file.display()),
            }
        }
        Ok(())
    }
}

/// 目录下所有`.mat`文件，按路径排序。
fn mat_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("无法遍历`{}`", dir.display()))?;
        let is_mat = entry
            .path()
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case("mat"));
        if entry.file_type().is_file() && is_mat {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn describe(path: &Path) -> anyhow::Result<String> {
    let mat = MatFile::open(path).with_context(|| format!("无法读取`{}`", path.display()))?;
    let mut s = String::new();
    writeln!(s, "{}:", path.display())?;
    for a in mat.arrays() {
        let dims: Vec<String> = a.dims.iter().map(usize::to_string).collect();
        let mut flags = String::new();
        if a.logical {
            flags.push_str(" logical");
        }
        if a.complex {
            flags.push_str(" complex");
        }
        writeln!(s, "  {:<20} {:<8} {}{flags}", a.name, a.class, dims.join("x"))?;
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array3};
    use std::fs;

    #[test]
    fn test_describe_and_walk() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir_all(&sub).unwrap();

        let a = sub.join("b.mat");
        MatWriter::new()
            .add("cost", &arr2(&[[1.0_f32], [2.0]]))
            .unwrap()
            .add("vol", &Array3::<f64>::zeros((2, 3, 4)))
            .unwrap()
            .save(&a)
            .unwrap();
        MatWriter::new()
            .add("x", &arr2(&[[0.0_f32]]))
            .unwrap()
            .save(dir.path().join("a.MAT"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let text = describe(&a).unwrap();
        assert!(text.contains("cost"));
        assert!(text.contains("single"));
        assert!(text.contains("2x1"));
        assert!(text.contains("2x3x4"));

        let files = mat_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.MAT"));

        fs::write(dir.path().join("broken.mat"), b"not a mat file").unwrap();
        assert!(describe(&dir.path().join("broken.mat")).is_err());
        let mut cmd = MatInfo {
            path: dir.path().to_path_buf(),
        };
        assert!(cmd.run().is_ok());
    }
}
