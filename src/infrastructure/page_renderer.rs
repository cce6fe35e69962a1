//! 页面渲染 - 基础设施层
//!
//! 页数用 lopdf 读取，单页渲染调用 poppler 的 `pdftoppm`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::RenderQuality;
use crate::error::CapabilityError;

/// 采样偏移（从末尾数）
const SAMPLE_OFFSETS_FROM_END: [usize; 3] = [2, 4, 6];

/// 一张渲染好的页面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 从 1 开始
    pub page_number: usize,
    pub png: Vec<u8>,
}

/// 页面渲染能力
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn page_count(&self, path: &Path) -> Result<usize, CapabilityError>;

    /// `page_number` 从 1 开始
    async fn render_page(&self, path: &Path, page_number: usize)
        -> Result<PageImage, CapabilityError>;
}

/// 分类用的页面选择策略，返回从 0 开始的页索引（升序）
///
/// 优先取倒数第 2、4、6 页；不足 `sample_count` 时退回最后 N 页
pub fn select_page_indices(total_pages: usize, sample_count: usize) -> Vec<usize> {
    let mut picked: Vec<usize> = SAMPLE_OFFSETS_FROM_END
        .iter()
        .filter_map(|offset| total_pages.checked_sub(*offset))
        .collect();

    if picked.len() < sample_count {
        picked = (total_pages.saturating_sub(sample_count)..total_pages).collect();
    }

    picked.sort_unstable();
    picked.dedup();
    picked
}

/// 同上，返回从 1 开始的页码
pub fn select_page_numbers(total_pages: usize, sample_count: usize) -> Vec<usize> {
    select_page_indices(total_pages, sample_count)
        .into_iter()
        .map(|i| i + 1)
        .collect()
}

/// 按选择策略渲染分类用的页面，按页码升序返回
pub async fn render_for_classification(
    renderer: &dyn PageRenderer,
    path: &Path,
    sample_count: usize,
) -> Result<Vec<PageImage>, CapabilityError> {
    let total = renderer.page_count(path).await?;
    if total == 0 {
        return Err(CapabilityError::InvalidOutput(format!(
            "PDF 没有页面: {}",
            path.display()
        )));
    }

    let pages = select_page_numbers(total, sample_count);
    debug!("共 {} 页，分类采样页码: {:?}", total, pages);

    let mut images = Vec::with_capacity(pages.len());
    for page_number in pages {
        images.push(renderer.render_page(path, page_number).await?);
    }
    Ok(images)
}

/// lopdf + pdftoppm
pub struct PdftoppmRenderer {
    quality: RenderQuality,
    program: String,
}

impl PdftoppmRenderer {
    pub fn new(quality: RenderQuality) -> Self {
        Self {
            quality,
            program: "pdftoppm".to_string(),
        }
    }

    fn tool_error(&self, message: impl Into<String>) -> CapabilityError {
        CapabilityError::Tool {
            tool: self.program.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn page_count(&self, path: &Path) -> Result<usize, CapabilityError> {
        let path: PathBuf = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || {
            lopdf::Document::load(&path)
                .map(|doc| doc.get_pages().len())
                .map_err(|e| format!("无法读取 PDF {}: {}", path.display(), e))
        })
        .await
        .map_err(|e| CapabilityError::Tool {
            tool: "lopdf".to_string(),
            message: e.to_string(),
        })?;

        pages.map_err(|message| CapabilityError::Tool {
            tool: "lopdf".to_string(),
            message,
        })
    }

    async fn render_page(
        &self,
        path: &Path,
        page_number: usize,
    ) -> Result<PageImage, CapabilityError> {
        let scratch = tempfile::tempdir().map_err(|e| self.tool_error(e.to_string()))?;
        let prefix = scratch.path().join("page");
        let page = page_number.to_string();

        let output = Command::new(&self.program)
            .arg("-png")
            .arg("-r")
            .arg(self.quality.dpi().to_string())
            .args(["-f", &page, "-l", &page, "-singlefile"])
            .arg(path)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| self.tool_error(format!("无法启动: {}", e)))?;

        if !output.status.success() {
            return Err(self.tool_error(format!(
                "第 {} 页渲染失败: {}",
                page_number,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let png_path = prefix.with_extension("png");
        let png = tokio::fs::read(&png_path)
            .await
            .map_err(|e| self.tool_error(format!("读取 {} 失败: {}", png_path.display(), e)))?;

        Ok(PageImage { page_number, png })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_ten_pages_pick_even_offsets_from_end() {
        assert_eq!(select_page_indices(10, 3), vec![4, 6, 8]);
        assert_eq!(select_page_numbers(10, 3), vec![5, 7, 9]);
    }

    #[test]
    fn test_short_document_falls_back_to_last_pages() {
        assert_eq!(select_page_indices(2, 3), vec![0, 1]);
        assert_eq!(select_page_numbers(2, 3), vec![1, 2]);
        assert_eq!(select_page_indices(1, 3), vec![0]);
        // 6 页时偏移 2、4、6 都可用
        assert_eq!(select_page_indices(6, 3), vec![0, 2, 4]);
        // 5 页时只有两个偏移可用，退回最后 3 页
        assert_eq!(select_page_indices(5, 3), vec![2, 3, 4]);
    }

    struct FakeRenderer {
        pages: usize,
        rendered: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn page_count(&self, _path: &Path) -> Result<usize, CapabilityError> {
            Ok(self.pages)
        }

        async fn render_page(
            &self,
            _path: &Path,
            page_number: usize,
        ) -> Result<PageImage, CapabilityError> {
            self.rendered.lock().unwrap().push(page_number);
            Ok(PageImage {
                page_number,
                png: vec![0x89],
            })
        }
    }

    #[tokio::test]
    async fn test_render_for_classification_in_ascending_order() {
        let renderer = FakeRenderer {
            pages: 12,
            rendered: Mutex::new(Vec::new()),
        };
        let images = render_for_classification(&renderer, Path::new("paper.pdf"), 3)
            .await
            .unwrap();

        let numbers: Vec<usize> = images.iter().map(|i| i.page_number).collect();
        assert_eq!(numbers, vec![7, 9, 11]);
        assert_eq!(*renderer.rendered.lock().unwrap(), vec![7, 9, 11]);
    }

    #[tokio::test]
    async fn test_empty_pdf_is_rejected() {
        let renderer = FakeRenderer {
            pages: 0,
            rendered: Mutex::new(Vec::new()),
        };
        assert!(render_for_classification(&renderer, Path::new("x.pdf"), 3)
            .await
            .is_err());
    }
}
