use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AnalysisModule, ModuleOutput, ParentContext};
use crate::api::ReportApi;
use crate::content::ContentBlock;
use crate::error::Result;
use crate::render::{FOOTER_KEY, ORGANIZATION_KEY};

/// Adds the organisation name and a "generated on" footer to the document.
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    pub author: Option<String>,
    /// Fixed generation time. Defaults to the time `run` is called.
    pub generated_at: Option<DateTime<Utc>>,
}

impl MetaData {
    pub fn new(author: Option<String>) -> Self {
        Self {
            author,
            generated_at: None,
        }
    }
}

pub fn footer_text(generated_at: DateTime<Utc>, author: Option<&str>) -> String {
    let mut footer = format!(
        "Generated on {}",
        generated_at.format("%B %d, %Y at %H:%M UTC")
    );
    if let Some(author) = author.filter(|a| !a.is_empty()) {
        footer.push_str(" by ");
        footer.push_str(author);
    }
    footer
}

#[async_trait]
impl AnalysisModule for MetaData {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn preflight(&mut self, _api: &dyn ReportApi, _parent: &ParentContext) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput> {
        let organization = api.organization_name().await?;
        let generated_at = self.generated_at.unwrap_or_else(Utc::now);

        let mut context = BTreeMap::new();
        context.insert(ORGANIZATION_KEY.to_string(), organization);
        context.insert(
            FOOTER_KEY.to_string(),
            footer_text(generated_at, self.author.as_deref()),
        );
        Ok(vec![ContentBlock::Metadata(context)].into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use chrono::TimeZone;

    #[tokio::test]
    async fn footer_names_the_author() {
        let mut module = MetaData {
            author: Some("Risk team".into()),
            generated_at: Some(Utc.with_ymd_and_hms(2023, 3, 7, 14, 5, 0).unwrap()),
        };
        let output = module.run(&FakeApi::default()).await.unwrap();

        let ContentBlock::Metadata(context) = &output.blocks[0] else {
            panic!("expected metadata block");
        };
        assert_eq!(context[ORGANIZATION_KEY], "demo");
        assert_eq!(
            context[FOOTER_KEY],
            "Generated on March 07, 2023 at 14:05 UTC by Risk team"
        );
    }

    #[test]
    fn footer_without_author() {
        let at = Utc.with_ymd_and_hms(2023, 12, 1, 9, 0, 0).unwrap();
        assert_eq!(footer_text(at, None), "Generated on December 01, 2023 at 09:00 UTC");
    }
}
