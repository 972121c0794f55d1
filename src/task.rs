// 该文件是 Chepai （车牌识读） 项目的一部分。
// src/task.rs - 检测与渲染任务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  fmt::Display,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc,
  },
  thread,
  time::{Duration, Instant},
};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  geometry::{self, Extent},
  model::{DetectError, DetectResult, Detector, Model},
  output::Render,
  overlay::Canvas,
  recognize::{Recognizer, recognize_or_none},
};

/// 检测器加文本识别，运行在工作线程上
pub struct Pipeline<M, R> {
  detector: Detector<M>,
  recognizer: R,
}

/// 一帧的处理结果，交给渲染线程
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
  pub frame: Frame,
  /// 检测框所在的网络输入空间
  pub network: Extent,
  pub detections: DetectResult,
  /// 与 `detections` 一一对应的识别文本
  pub texts: Vec<Option<String>>,
}

impl FrameAnalysis {
  pub fn recognized(&self) -> usize {
    self.texts.iter().filter(|t| t.is_some()).count()
  }
}

impl<M, R> Pipeline<M, R>
where
  M: Model<Input = Frame>,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: Recognizer + Sync,
  R::Error: Display,
{
  pub fn new(detector: Detector<M>, recognizer: R) -> Self {
    Self {
      detector,
      recognizer,
    }
  }

  pub fn detector(&self) -> &Detector<M> {
    &self.detector
  }

  /// 检测，然后把每个检测框映射回源图像、裁剪并并行识别
  pub fn analyse_frame(&self, frame: Frame) -> Result<FrameAnalysis, DetectError> {
    let detections = self.detector.detect(&frame)?;
    let network = self.detector.spec().input_extent();
    let source = frame.extent();

    let recognizer = &self.recognizer;
    let texts: Vec<Option<String>> = detections
      .items
      .par_iter()
      .map(|detection| {
        let rect = geometry::map(detection, network, source);
        recognize_or_none(recognizer, &frame.crop(rect))
      })
      .collect();

    for ((_, detection), text) in detections.iter().zip(&texts) {
      debug!(
        "帧 {}: {} at ({:.0}, {:.0}, {:.0}x{:.0}) {}",
        frame.index,
        detection.description(),
        detection.x,
        detection.y,
        detection.width,
        detection.height,
        text.as_deref().unwrap_or("-")
      );
    }

    Ok(FrameAnalysis {
      frame,
      network,
      detections,
      texts,
    })
  }
}

/// 在渲染线程上重建画布并输出
pub fn render_frame<O: Render>(
  output: &O,
  canvas: &mut Canvas,
  analysis: &FrameAnalysis,
) -> Result<(), O::Error> {
  let extent = output.canvas_extent(analysis.frame.extent());
  canvas.rebuild(
    extent,
    analysis.network,
    &analysis.detections,
    &analysis.texts,
  );
  output.render_result(&analysis.frame, canvas)
}

pub trait Task<I, P, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, pipeline: P, output: O) -> Result<Self::Output, Self::Error>;
}

/// 只处理第一帧
pub struct OneShotTask;

impl<I, M, R, O> Task<I, Pipeline<M, R>, O> for OneShotTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = Frame>,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: Recognizer + Sync,
  R::Error: Display,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = FrameAnalysis;
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    pipeline: Pipeline<M, R>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let analysis = pipeline.analyse_frame(frame)?;
    info!(
      "推理完成，耗时: {:.2?}, {} 个检测结果",
      now.elapsed(),
      analysis.detections.len()
    );

    let mut canvas = Canvas::new(analysis.frame.extent());
    render_frame(&output, &mut canvas, &analysis)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(analysis)
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskSummary {
  pub frames: usize,
  pub detections: usize,
  pub recognized: usize,
}

/// 连续处理所有帧
///
/// 工作线程负责读取、推理和识别，调用线程持有输出和画布。
/// 两者之间是容量为 0 的同步通道，渲染线程同一时刻只处理一帧。
#[derive(Debug, Default)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  cancel: Arc<AtomicBool>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 置位后工作线程在下一帧开始前停止
  pub fn cancel_flag(&self) -> Arc<AtomicBool> {
    self.cancel.clone()
  }

  /// Ctrl-C 置位取消标志，30 秒内没有退出则强制结束进程
  pub fn with_ctrlc_handler(self) -> Result<Self, ctrlc::Error> {
    let cancel = self.cancel.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      cancel.store(true, Ordering::SeqCst);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(self)
  }
}

impl<I, M, R, O> Task<I, Pipeline<M, R>, O> for ContinuousTask
where
  I: Iterator<Item = Frame> + Send,
  M: Model<Input = Frame> + Send,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: Recognizer + Send + Sync,
  R::Error: Display,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = TaskSummary;
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    pipeline: Pipeline<M, R>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::sync_channel::<FrameAnalysis>(0);
    let cancel = self.cancel.clone();
    let frame_number = self.frame_number;

    thread::scope(|scope| -> Result<TaskSummary, anyhow::Error> {
      let worker = scope.spawn(move || -> Result<(), DetectError> {
        let mut input = input;
        let mut count = 0;
        loop {
          if cancel.load(Ordering::SeqCst) {
            warn!("中断信号接收，退出任务循环");
            break;
          }
          if frame_number.is_some_and(|n| count >= n) {
            info!("达到指定帧数 {}, 退出任务循环", count);
            break;
          }
          let Some(frame) = input.next() else {
            info!("输入结束");
            break;
          };
          count += 1;

          let now = Instant::now();
          let index = frame.index;
          let analysis = pipeline.analyse_frame(frame)?;
          info!("第 {} 帧推理完成，耗时: {:.2?}", index, now.elapsed());
          if tx.send(analysis).is_err() {
            debug!("渲染线程已退出");
            break;
          }
        }
        Ok(())
      });

      let mut summary = TaskSummary::default();
      let mut canvas = Canvas::new(Extent::default());
      let rendered = rx.iter().try_for_each(|analysis| {
        let now = Instant::now();
        render_frame(&output, &mut canvas, &analysis)?;
        debug!("第 {} 帧渲染完成，耗时: {:.2?}", analysis.frame.index, now.elapsed());
        summary.frames += 1;
        summary.detections += analysis.detections.len();
        summary.recognized += analysis.recognized();
        Ok::<(), O::Error>(())
      });
      // 渲染出错时关闭接收端，工作线程在下一次发送时停止
      drop(rx);

      let worked = worker
        .join()
        .map_err(|_| anyhow::anyhow!("工作线程异常退出"))?;
      rendered?;
      worked?;

      info!(
        "任务完成，退出: {} 帧, {} 个检测结果, {} 个识别文本",
        summary.frames, summary.detections, summary.recognized
      );
      Ok(summary)
    })
  }
}
