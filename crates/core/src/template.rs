//! Journey templates - static phase/checkpoint content shared by all users.
//!
//! A template holds content only. Per-user progress lives in the progress
//! store and is merged in by [`JourneyTemplate::instantiate`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointState};
use crate::error::{JourneyError, Result};
use crate::id::{CheckpointId, JourneyId, PhaseId, UserId};
use crate::journey::{Journey, Phase};

/// Static definition of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointTemplate {
    /// Identifier, unique within the journey
    pub id: CheckpointId,
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
}

/// Static definition of a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTemplate {
    /// Identifier, unique within the journey
    pub id: PhaseId,
    /// Display name
    pub name: String,
    /// Checkpoints in order
    pub checkpoints: Vec<CheckpointTemplate>,
}

/// Static definition of a journey track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyTemplate {
    /// Globally unique template id
    pub id: JourneyId,
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Phases in navigation order
    pub phases: Vec<PhaseTemplate>,
}

/// Where a checkpoint sits inside a template.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointLocation<'a> {
    /// Index of the phase in the journey
    pub phase_index: usize,
    /// The phase
    pub phase: &'a PhaseTemplate,
    /// The checkpoint
    pub checkpoint: &'a CheckpointTemplate,
}

impl JourneyTemplate {
    /// Find a checkpoint anywhere in the journey.
    pub fn locate(&self, checkpoint_id: &CheckpointId) -> Option<CheckpointLocation<'_>> {
        self.phases.iter().enumerate().find_map(|(phase_index, phase)| {
            phase
                .checkpoints
                .iter()
                .find(|c| &c.id == checkpoint_id)
                .map(|checkpoint| CheckpointLocation {
                    phase_index,
                    phase,
                    checkpoint,
                })
        })
    }

    /// State of a checkpoint with no stored record. Only the first phase
    /// starts unlocked.
    pub fn default_state(&self, phase_index: usize) -> CheckpointState {
        CheckpointState::initial(phase_index == 0)
    }

    /// Merge this template with a user's stored checkpoint states.
    pub fn instantiate(
        &self,
        user_id: &UserId,
        states: &HashMap<CheckpointId, CheckpointState>,
    ) -> Journey {
        let phases = self
            .phases
            .iter()
            .enumerate()
            .map(|(phase_index, phase)| Phase {
                id: phase.id.clone(),
                name: phase.name.clone(),
                checkpoints: phase
                    .checkpoints
                    .iter()
                    .map(|tpl| {
                        let state = states
                            .get(&tpl.id)
                            .cloned()
                            .unwrap_or_else(|| self.default_state(phase_index));
                        Checkpoint {
                            id: tpl.id.clone(),
                            name: tpl.name.clone(),
                            description: tpl.description.clone(),
                            status: state.status,
                            completion_percentage: state.completion_percentage,
                            eligible: state.eligible,
                            metadata: state.metadata,
                            updated_at: state.updated_at,
                        }
                    })
                    .collect(),
            })
            .collect();

        Journey {
            id: self.id.clone(),
            user_id: user_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            phases,
        }
    }

    /// Check slugs and id uniqueness.
    pub fn validate(&self) -> Result<()> {
        check_slug("journey", self.id.as_str())?;

        let mut phase_ids = HashSet::new();
        let mut checkpoint_ids = HashSet::new();
        for phase in &self.phases {
            check_slug("phase", phase.id.as_str())?;
            if !phase_ids.insert(&phase.id) {
                return Err(JourneyError::InvalidTemplate(format!(
                    "duplicate phase '{}' in journey '{}'",
                    phase.id, self.id
                )));
            }
            // An empty phase can never complete.
            if phase.checkpoints.is_empty() {
                return Err(JourneyError::InvalidTemplate(format!(
                    "phase '{}' in journey '{}' has no checkpoints",
                    phase.id, self.id
                )));
            }
            for checkpoint in &phase.checkpoints {
                check_slug("checkpoint", checkpoint.id.as_str())?;
                if !checkpoint_ids.insert(&checkpoint.id) {
                    return Err(JourneyError::InvalidTemplate(format!(
                        "duplicate checkpoint '{}' in journey '{}'",
                        checkpoint.id, self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn slug_pattern() -> Option<&'static Regex> {
    static SLUG: OnceLock<Option<Regex>> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").ok()).as_ref()
}

fn check_slug(kind: &str, value: &str) -> Result<()> {
    if slug_pattern().is_some_and(|re| re.is_match(value)) {
        Ok(())
    } else {
        Err(JourneyError::InvalidTemplate(format!(
            "{} id '{}' is not a lowercase slug",
            kind, value
        )))
    }
}

/// Set of known journey templates, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<JourneyId, JourneyTemplate>,
}

impl TemplateCatalog {
    /// Build a catalog, validating every template.
    pub fn new(templates: Vec<JourneyTemplate>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for template in templates {
            template.validate()?;
            if map.contains_key(&template.id) {
                return Err(JourneyError::InvalidTemplate(format!(
                    "duplicate journey '{}'",
                    template.id
                )));
            }
            map.insert(template.id.clone(), template);
        }
        Ok(Self { templates: map })
    }

    /// Parse a JSON array of templates.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let templates: Vec<JourneyTemplate> = serde_json::from_str(json)
            .map_err(|e| JourneyError::InvalidTemplate(e.to_string()))?;
        Self::new(templates)
    }

    /// Read a JSON array of templates from disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            JourneyError::InvalidTemplate(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// The three tracks shipped with the product.
    pub fn builtin() -> Self {
        let templates = vec![business_magician(), job_magician(), vr4deaf()];
        let templates = templates.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self { templates }
    }

    /// Look up a template; `NotFound` if unknown.
    pub fn get(&self, id: &JourneyId) -> Result<&JourneyTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| JourneyError::NotFound(format!("journey template '{}'", id)))
    }

    /// All templates in id order.
    pub fn iter(&self) -> impl Iterator<Item = &JourneyTemplate> {
        self.templates.values()
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn cp(id: &str, name: &str, description: &str) -> CheckpointTemplate {
    CheckpointTemplate {
        id: CheckpointId::new(id),
        name: name.to_string(),
        description: description.to_string(),
    }
}

fn phase(id: &str, name: &str, checkpoints: Vec<CheckpointTemplate>) -> PhaseTemplate {
    PhaseTemplate {
        id: PhaseId::new(id),
        name: name.to_string(),
        checkpoints,
    }
}

fn business_magician() -> JourneyTemplate {
    JourneyTemplate {
        id: JourneyId::new("business-magician"),
        name: "Business Magician Journey".to_string(),
        description: "Transform your business idea into reality with our guided checkpoints"
            .to_string(),
        phases: vec![
            phase(
                "idea",
                "Idea",
                vec![cp("business-vision", "Business Vision", "Define your mission, niche, and goals")],
            ),
            phase(
                "build",
                "Build",
                vec![
                    cp("structure-legal", "Structure & Legal", "File documents, register business, EIN"),
                    cp("financial-setup", "Financial Setup", "Open bank account, credit building"),
                ],
            ),
            phase(
                "grow",
                "Grow",
                vec![
                    cp("market-ops", "Market & Ops", "Marketing plan, automation setup"),
                    cp("funding-strategy", "Funding Strategy", "Capital sources, revenue streams"),
                ],
            ),
            phase(
                "manage",
                "Manage",
                vec![cp("compliance-scaling", "Compliance & Scaling", "SOPs, tax filing, HR, etc.")],
            ),
        ],
    }
}

fn job_magician() -> JourneyTemplate {
    JourneyTemplate {
        id: JourneyId::new("job-magician"),
        name: "Job Magician Journey".to_string(),
        description: "Navigate your career path with our guided checkpoints".to_string(),
        phases: vec![
            phase(
                "assessment",
                "Assessment",
                vec![cp("career-mapping", "Career Mapping", "Explore paths based on personality + goals")],
            ),
            phase(
                "skills",
                "Skills",
                vec![cp("soft-hard-skills", "Soft + Hard Skills", "Rate & train on job-essential skills")],
            ),
            phase(
                "training",
                "Training",
                vec![cp("enroll-learn", "Enroll + Learn", "Assign training courses, track progress")],
            ),
            phase(
                "resume",
                "Résumé",
                vec![cp("resume-linkedin", "Résumé + LinkedIn", "Build assets, review with AI + mentor")],
            ),
            phase(
                "placement",
                "Placement",
                vec![cp("job-app-followup", "Job App & Followup", "Apply, track apps, interview prep")],
            ),
        ],
    }
}

fn vr4deaf() -> JourneyTemplate {
    JourneyTemplate {
        id: JourneyId::new("vr4deaf"),
        name: "VR4Deaf Workforce Journey".to_string(),
        description:
            "Comprehensive vocational rehabilitation and workforce solutions for deaf individuals"
                .to_string(),
        phases: vec![
            phase(
                "intake-assessment",
                "Intake & Assessment",
                vec![
                    cp("eligibility-determination", "Eligibility Determination", "Determine VR services eligibility and benefits"),
                    cp("comprehensive-assessment", "Comprehensive Assessment", "Evaluate skills, interests, and accommodation needs"),
                ],
            ),
            phase(
                "planning-goals",
                "Planning & Goals",
                vec![
                    cp("ipr-development", "IPR Development", "Create Individualized Plan for Rehabilitation"),
                    cp("career-exploration", "Career Exploration", "Explore career options and labor market trends"),
                ],
            ),
            phase(
                "skills-training",
                "Skills & Training",
                vec![
                    cp("vocational-training", "Vocational Training", "Complete job-specific skills training programs"),
                    cp("workplace-readiness", "Workplace Readiness", "Develop soft skills and workplace communication"),
                    cp("assistive-technology", "Assistive Technology", "Learn workplace assistive technology and tools"),
                ],
            ),
            phase(
                "job-placement",
                "Job Placement",
                vec![
                    cp("job-development", "Job Development", "Work with employers to develop job opportunities"),
                    cp("job-matching", "Job Matching", "Match skills and interests with available positions"),
                    cp("workplace-accommodations", "Workplace Accommodations", "Coordinate reasonable accommodations with employers"),
                ],
            ),
            phase(
                "retention-advancement",
                "Retention & Advancement",
                vec![
                    cp("job-coaching", "Job Coaching", "Receive on-the-job support and coaching"),
                    cp("career-advancement", "Career Advancement", "Plan for promotions and career growth"),
                    cp("case-closure", "Successful Case Closure", "Achieve stable employment and close VR case"),
                ],
            ),
        ],
    }
}
