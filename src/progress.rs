//! Section catalogue and the read-side projection of a deal's progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::DealProgress;

/// Form sections in canonical order. Declaration order is the resumption order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    #[serde(rename = "Section1a_PersonalInfo")]
    PersonalInfo,
    #[serde(rename = "Section1b_CurrentEmployment")]
    CurrentEmployment,
    #[serde(rename = "Section1c_AdditionalEmployment")]
    AdditionalEmployment,
    #[serde(rename = "Section1d_PreviousEmployment")]
    PreviousEmployment,
    #[serde(rename = "Section1e_OtherIncome")]
    OtherIncome,
    #[serde(rename = "Section2a_Assets")]
    Assets,
    #[serde(rename = "Section2b_OtherAssetsCredits")]
    OtherAssetsCredits,
    #[serde(rename = "Section2c_Liabilities")]
    Liabilities,
    #[serde(rename = "Section2d_Expenses")]
    Expenses,
    #[serde(rename = "Section3_RealEstateOwned")]
    RealEstateOwned,
    #[serde(rename = "Section4_LoanPropertyInfo")]
    LoanPropertyInfo,
    #[serde(rename = "Section5_Declarations")]
    Declarations,
    #[serde(rename = "Section6_Acknowledgments")]
    Acknowledgments,
    #[serde(rename = "Section7_MilitaryService")]
    MilitaryService,
    #[serde(rename = "Section8_Demographics")]
    Demographics,
    #[serde(rename = "Section9_OriginatorInfo")]
    OriginatorInfo,
    #[serde(rename = "Lender_L1_PropertyLoanInfo")]
    LenderPropertyLoanInfo,
    #[serde(rename = "Lender_L2_TitleInfo")]
    LenderTitleInfo,
    #[serde(rename = "Lender_L3_MortgageLoanInfo")]
    LenderMortgageLoanInfo,
    #[serde(rename = "Lender_L4_Qualification")]
    LenderQualification,
    #[serde(rename = "ContinuationSheet")]
    ContinuationSheet,
    #[serde(rename = "UnmarriedAddendum")]
    UnmarriedAddendum,
}

impl Section {
    pub const ALL: [Section; 22] = [
        Section::PersonalInfo,
        Section::CurrentEmployment,
        Section::AdditionalEmployment,
        Section::PreviousEmployment,
        Section::OtherIncome,
        Section::Assets,
        Section::OtherAssetsCredits,
        Section::Liabilities,
        Section::Expenses,
        Section::RealEstateOwned,
        Section::LoanPropertyInfo,
        Section::Declarations,
        Section::Acknowledgments,
        Section::MilitaryService,
        Section::Demographics,
        Section::OriginatorInfo,
        Section::LenderPropertyLoanInfo,
        Section::LenderTitleInfo,
        Section::LenderMortgageLoanInfo,
        Section::LenderQualification,
        Section::ContinuationSheet,
        Section::UnmarriedAddendum,
    ];

    /// Canonical name, as stored in the progress record.
    pub fn name(&self) -> &'static str {
        match self {
            Section::PersonalInfo => "Section1a_PersonalInfo",
            Section::CurrentEmployment => "Section1b_CurrentEmployment",
            Section::AdditionalEmployment => "Section1c_AdditionalEmployment",
            Section::PreviousEmployment => "Section1d_PreviousEmployment",
            Section::OtherIncome => "Section1e_OtherIncome",
            Section::Assets => "Section2a_Assets",
            Section::OtherAssetsCredits => "Section2b_OtherAssetsCredits",
            Section::Liabilities => "Section2c_Liabilities",
            Section::Expenses => "Section2d_Expenses",
            Section::RealEstateOwned => "Section3_RealEstateOwned",
            Section::LoanPropertyInfo => "Section4_LoanPropertyInfo",
            Section::Declarations => "Section5_Declarations",
            Section::Acknowledgments => "Section6_Acknowledgments",
            Section::MilitaryService => "Section7_MilitaryService",
            Section::Demographics => "Section8_Demographics",
            Section::OriginatorInfo => "Section9_OriginatorInfo",
            Section::LenderPropertyLoanInfo => "Lender_L1_PropertyLoanInfo",
            Section::LenderTitleInfo => "Lender_L2_TitleInfo",
            Section::LenderMortgageLoanInfo => "Lender_L3_MortgageLoanInfo",
            Section::LenderQualification => "Lender_L4_Qualification",
            Section::ContinuationSheet => "ContinuationSheet",
            Section::UnmarriedAddendum => "UnmarriedAddendum",
        }
    }

    /// Short key used by the wizard's navigation (`section1a`, `lenderL2`).
    pub fn key(&self) -> &'static str {
        match self {
            Section::PersonalInfo => "section1a",
            Section::CurrentEmployment => "section1b",
            Section::AdditionalEmployment => "section1c",
            Section::PreviousEmployment => "section1d",
            Section::OtherIncome => "section1e",
            Section::Assets => "section2a",
            Section::OtherAssetsCredits => "section2b",
            Section::Liabilities => "section2c",
            Section::Expenses => "section2d",
            Section::RealEstateOwned => "section3",
            Section::LoanPropertyInfo => "section4",
            Section::Declarations => "section5",
            Section::Acknowledgments => "section6",
            Section::MilitaryService => "section7",
            Section::Demographics => "section8",
            Section::OriginatorInfo => "section9",
            Section::LenderPropertyLoanInfo => "lenderL1",
            Section::LenderTitleInfo => "lenderL2",
            Section::LenderMortgageLoanInfo => "lenderL3",
            Section::LenderQualification => "lenderL4",
            Section::ContinuationSheet => "continuation",
            Section::UnmarriedAddendum => "unmarriedAddendum",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Section {
    type Err = AppError;

    /// Accepts the canonical name or the short key, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Section::ALL
            .iter()
            .copied()
            .find(|section| {
                section.name().eq_ignore_ascii_case(wanted)
                    || section.key().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| AppError::ValidationError(format!("unknown section '{}'", wanted)))
    }
}

/// Completion flags keyed by section. Missing entries read as incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SectionFlags(BTreeMap<Section, bool>);

/// Stored flags may carry keys for sections that no longer exist; those are dropped.
impl<'de> Deserialize<'de> for SectionFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = BTreeMap::<String, bool>::deserialize(deserializer)?;
        let flags = raw
            .into_iter()
            .filter_map(|(key, complete)| {
                key.parse::<Section>().ok().map(|section| (section, complete))
            })
            .collect();
        Ok(SectionFlags(flags))
    }
}

impl SectionFlags {
    pub fn is_complete(&self, section: Section) -> bool {
        self.0.get(&section).copied().unwrap_or(false)
    }

    pub fn set(&mut self, section: Section, complete: bool) {
        self.0.insert(section, complete);
    }

    pub fn completed_count(&self) -> usize {
        Section::ALL.iter().filter(|s| self.is_complete(**s)).count()
    }

    /// Whole percent of sections complete, rounded down. Unweighted.
    pub fn percentage(&self) -> i32 {
        (self.completed_count() * 100 / Section::ALL.len()) as i32
    }

    /// First section in canonical order that is not complete.
    pub fn next_incomplete(&self) -> Option<Section> {
        Section::ALL.iter().copied().find(|s| !self.is_complete(*s))
    }
}

impl FromIterator<Section> for SectionFlags {
    fn from_iter<I: IntoIterator<Item = Section>>(iter: I) -> Self {
        let mut flags = SectionFlags::default();
        for section in iter {
            flags.set(section, true);
        }
        flags
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionStatus {
    pub section: Section,
    pub key: &'static str,
    pub complete: bool,
}

/// Read model returned by `getProgress`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub deal_id: Uuid,
    pub sections: Vec<SectionStatus>,
    pub progress_percentage: i32,
    pub completed_sections: usize,
    pub total_sections: usize,
    pub last_updated_section: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub progress_notes: Option<String>,
    /// `None` once every section is complete.
    pub next_incomplete_section: Option<Section>,
}

impl ProgressView {
    pub fn project(progress: &DealProgress) -> Self {
        let flags = &progress.section_flags.0;
        Self {
            deal_id: progress.deal_id,
            sections: Section::ALL
                .iter()
                .map(|s| SectionStatus {
                    section: *s,
                    key: s.key(),
                    complete: flags.is_complete(*s),
                })
                .collect(),
            // Recomputed so a stale stored value never leaks to clients
            progress_percentage: flags.percentage(),
            completed_sections: flags.completed_count(),
            total_sections: Section::ALL.len(),
            last_updated_section: progress.last_updated_section.clone(),
            last_updated_at: progress.last_updated_at,
            progress_notes: progress.notes.clone(),
            next_incomplete_section: flags.next_incomplete(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;

    #[test]
    fn test_catalogue_names_round_trip() {
        for section in Section::ALL {
            assert_eq!(section.name().parse::<Section>().unwrap(), section);
            assert_eq!(section.key().parse::<Section>().unwrap(), section);
        }
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(matches!(
            "Section10_Bogus".parse::<Section>(),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_percentage_rounds_down() {
        let flags: SectionFlags = [Section::PersonalInfo].into_iter().collect();
        assert_eq!(flags.percentage(), 4);
        let all: SectionFlags = Section::ALL.into_iter().collect();
        assert_eq!(all.percentage(), 100);
        assert_eq!(SectionFlags::default().percentage(), 0);
    }

    #[test]
    fn test_next_incomplete() {
        let mut flags: SectionFlags = [Section::PersonalInfo, Section::OtherIncome]
            .into_iter()
            .collect();
        assert_eq!(flags.next_incomplete(), Some(Section::CurrentEmployment));
        flags.set(Section::PersonalInfo, false);
        assert_eq!(flags.next_incomplete(), Some(Section::PersonalInfo));
        let all: SectionFlags = Section::ALL.into_iter().collect();
        assert_eq!(all.next_incomplete(), None);
    }

    #[test]
    fn test_flags_serialize_with_canonical_names() {
        let flags: SectionFlags = [Section::LenderTitleInfo].into_iter().collect();
        let value = serde_json::to_value(&flags).unwrap();
        assert_eq!(value, serde_json::json!({"Lender_L2_TitleInfo": true}));
        let back: SectionFlags = serde_json::from_value(value).unwrap();
        assert_eq!(back, flags);
    }

    #[test]
    fn test_stored_flags_skip_unknown_keys() {
        let stored = serde_json::json!({"bogus": true, "Section1a_PersonalInfo": true});
        let flags: SectionFlags = serde_json::from_value(stored).unwrap();
        assert_eq!(flags.completed_count(), 1);
        assert!(flags.is_complete(Section::PersonalInfo));
        assert_eq!(flags.next_incomplete(), Some(Section::CurrentEmployment));
    }

    #[test]
    fn test_project_view() {
        let progress = DealProgress {
            deal_id: Uuid::new_v4(),
            section_flags: Json([Section::PersonalInfo].into_iter().collect()),
            progress_percentage: 4,
            last_updated_section: Some("Section1a_PersonalInfo".into()),
            last_updated_at: Some(Utc::now()),
            notes: Some("call back Tuesday".into()),
            updated_at: None,
        };
        let view = ProgressView::project(&progress);
        assert_eq!(view.sections.len(), 22);
        assert!(view.sections[0].complete);
        assert_eq!(view.next_incomplete_section, Some(Section::CurrentEmployment));
        assert_eq!(view.progress_notes.as_deref(), Some("call back Tuesday"));
    }
}
