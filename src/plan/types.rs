use serde::{Deserialize, Serialize};

use crate::error::{LoopError, Result};

/// The persisted plan document.
///
/// Wire format is camelCase JSON so the document stays readable to both
/// humans and agents. Fields this version does not know about are captured
/// in `extra` and written back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub started: bool,

    #[serde(default)]
    pub iteration_prompt: String,

    #[serde(default)]
    pub stories: Vec<Story>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Plan {
    pub fn new(iteration_prompt: impl Into<String>) -> Self {
        Self {
            started: false,
            iteration_prompt: iteration_prompt.into(),
            stories: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_story(mut self, story: Story) -> Self {
        self.stories.push(story);
        self
    }

    pub fn story(&self, story_id: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == story_id)
    }

    pub fn story_mut(&mut self, story_id: &str) -> Option<&mut Story> {
        self.stories.iter_mut().find(|s| s.id == story_id)
    }

    /// The single story currently claimed, if any.
    pub fn in_progress_story(&self) -> Option<&Story> {
        self.stories.iter().find(|s| s.in_progress)
    }

    /// The first story in authoring order that has not passed yet.
    pub fn next_unfinished(&self) -> Option<&Story> {
        self.stories.iter().find(|s| !s.passes)
    }

    pub fn is_complete(&self) -> bool {
        !self.stories.is_empty() && self.stories.iter().all(|s| s.passes)
    }

    pub fn progress(&self) -> Progress {
        let total = self.stories.len();
        let completed = self.stories.iter().filter(|s| s.passes).count();

        Progress {
            completed,
            total,
            percentage: if total > 0 {
                ((completed * 100) / total) as u8
            } else {
                0
            },
        }
    }

    /// Check the plan invariants: story ids unique, at most one story
    /// in progress, no story both in progress and passing.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for story in &self.stories {
            if !seen.insert(story.id.as_str()) {
                return Err(LoopError::Invariant(format!(
                    "duplicate story id '{}'",
                    story.id
                )));
            }
        }

        let in_progress: Vec<&str> = self
            .stories
            .iter()
            .filter(|s| s.in_progress)
            .map(|s| s.id.as_str())
            .collect();
        if in_progress.len() > 1 {
            return Err(LoopError::Invariant(format!(
                "multiple stories in progress: {}",
                in_progress.join(", ")
            )));
        }

        if let Some(story) = self.stories.iter().find(|s| s.in_progress && s.passes) {
            return Err(LoopError::Invariant(format!(
                "story '{}' is both in progress and passing",
                story.id
            )));
        }

        Ok(())
    }
}

/// One discrete, independently completable unit of work.
///
/// The story set is fixed at plan-authoring time; only the lifecycle flags
/// mutate afterwards, and only through `PlanStore` operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,

    #[serde(default)]
    pub passes: bool,

    #[serde(default)]
    pub in_progress: bool,

    #[serde(default)]
    pub checkpoint: bool,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Story {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            passes: false,
            in_progress: false,
            checkpoint: false,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }
}

/// Result of `PlanStore::claim_next_story`.
///
/// `resumed` is true when the story was already in progress on entry, i.e.
/// this claim is recovering an interrupted attempt rather than starting a
/// fresh one.
#[derive(Debug, Clone)]
pub struct ClaimedStory {
    pub story: Story,
    pub resumed: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}% ({}/{})",
            self.percentage, self.completed, self.total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_single_in_progress() {
        let mut plan = Plan::new("prompt")
            .with_story(Story::new("US-001", "First"))
            .with_story(Story::new("US-002", "Second"));
        plan.story_mut("US-001").unwrap().in_progress = true;

        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_two_in_progress() {
        let mut plan = Plan::new("prompt")
            .with_story(Story::new("US-001", "First"))
            .with_story(Story::new("US-002", "Second"));
        plan.story_mut("US-001").unwrap().in_progress = true;
        plan.story_mut("US-002").unwrap().in_progress = true;

        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_in_progress_and_passing() {
        let mut plan = Plan::new("prompt").with_story(Story::new("US-001", "First"));
        let story = plan.story_mut("US-001").unwrap();
        story.in_progress = true;
        story.passes = true;

        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let plan = Plan::new("prompt")
            .with_story(Story::new("US-001", "First"))
            .with_story(Story::new("US-001", "Duplicate"));

        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_next_unfinished_respects_order() {
        let mut plan = Plan::new("prompt")
            .with_story(Story::new("A", "a"))
            .with_story(Story::new("B", "b"))
            .with_story(Story::new("C", "c"));
        plan.story_mut("A").unwrap().passes = true;

        assert_eq!(plan.next_unfinished().unwrap().id, "B");
    }

    #[test]
    fn test_unknown_fields_preserved_on_rewrite() {
        let doc = r#"{
            "started": false,
            "iterationPrompt": "do the thing",
            "boardColumn": "backlog",
            "stories": [
                {"id": "US-001", "title": "First", "passes": false,
                 "inProgress": false, "checkpoint": false, "estimate": 3}
            ]
        }"#;

        let plan: Plan = serde_json::from_str(doc).unwrap();
        assert_eq!(plan.extra.get("boardColumn").unwrap(), "backlog");
        assert_eq!(plan.stories[0].extra.get("estimate").unwrap(), 3);

        let rewritten = serde_json::to_string(&plan).unwrap();
        let reparsed: Plan = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(reparsed.extra.get("boardColumn").unwrap(), "backlog");
        assert_eq!(reparsed.stories[0].extra.get("estimate").unwrap(), 3);
    }

    #[test]
    fn test_progress() {
        let mut plan = Plan::new("prompt")
            .with_story(Story::new("A", "a"))
            .with_story(Story::new("B", "b"))
            .with_story(Story::new("C", "c"));
        plan.story_mut("A").unwrap().passes = true;
        plan.story_mut("B").unwrap().passes = true;

        let progress = plan.progress();
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.percentage, 66);
    }
}
