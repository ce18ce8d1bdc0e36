use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tracker")]
#[command(about = "三维特征跟踪中图像块匹配代价的计算与嵌入网络训练工具集.")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// 子命令。
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub fn run_program(&mut self) -> anyhow::Result<()> {
        match self.command {
            Commands::FitIntensity(ref mut v) => v.run(),
            Commands::TrainEmbedding(ref mut v) => v.run(),
            Commands::Embed(ref mut v) => v.run(),
            Commands::MatInfo(ref mut v) => v.run(),
            Commands::Patch2png(ref mut v) => v.run(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 用孪生匹配网络计算每一帧邻域对的匹配代价，输出`nbors_cost_<i>.mat`。
    FitIntensity(crate::subcmd_impls::fit_intensity::FitIntensity),
    /// 在带标签的图像块上训练分类网络，并保存其中的编码器。
    TrainEmbedding(crate::subcmd_impls::train_embedding::TrainEmbedding),
    /// 用保存的编码器计算图像块的嵌入向量。
    Embed(crate::subcmd_impls::embed::Embed),
    /// 列出`.mat`文件中的变量。
    MatInfo(crate::subcmd_impls::mat_info::MatInfo),
    /// 把图像块的中间切片保存为灰度png图像。
    Patch2png(crate::subcmd_impls::patch2png::Patch2png),
}
