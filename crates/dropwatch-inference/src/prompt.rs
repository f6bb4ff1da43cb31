//! Extraction prompt templates.
//!
//! The prompt asks the model for a single JSON object with an
//! `identified_projects` list. Per-update mode additionally asks for an
//! uncertainty flag on each record and top-level guide fields.

use dropwatch_core::{ActivityType, AggregationMode};

/// Renders extraction prompts for one aggregation mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder {
    mode: AggregationMode,
}

impl PromptBuilder {
    pub fn new(mode: AggregationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> AggregationMode {
        self.mode
    }

    /// Render the prompt for an already-normalized message.
    pub fn build(&self, text: &str, channel: &str) -> String {
        let mut prompt = String::with_capacity(text.len() + 4096);

        prompt.push_str(
            "Analyze the following Telegram message content. Identify ALL distinct crypto \
             projects mentioned and extract the specified information for EACH project into a \
             JSON object containing a list called \"identified_projects\".\n\n",
        );
        prompt.push_str("Message Content:\n---\n");
        prompt.push_str(text);
        prompt.push_str("\n---\n\n");
        prompt.push_str("Source Channel: ");
        prompt.push_str(channel);
        prompt.push_str("\n\nInstructions:\n");

        let mut steps: Vec<String> = vec![
            "Find every distinct 'project_name' being discussed (e.g. \"Babylon\", \"Mind \
             Network\", \"Seal\"). If no specific project is clearly mentioned, return an empty \
             list []."
                .to_string(),
            format!(
                "For EACH project found, determine the primary 'activity_type' relevant to that \
                 project's mention in the message. Choose ONE from: {}.",
                activity_labels()
            ),
            "For EACH project, set 'is_node_opportunity' to true if the message specifically \
             discusses running a node, setting up a validator, node requirements, or taking part \
             in an incentivized testnet as a node operator for that project. Otherwise false."
                .to_string(),
            "For EACH project, write a brief 1-sentence 'summary' of the core update specific to \
             that project."
                .to_string(),
            "For EACH project, list all non-referral URLs relevant to that project in the \
             'key_links' array."
                .to_string(),
            "For EACH project, list ONLY referral/invite URLs relevant to that project in the \
             'referral_links' array."
                .to_string(),
            "For EACH project, if a specific deadline is mentioned, note it in 'deadline' (text; \
             use YYYY-MM-DD when the date is unambiguous). Otherwise use null."
                .to_string(),
            "For EACH project, briefly summarize any specific actions the user needs to take in \
             'required_actions_summary'. If none, use null."
                .to_string(),
        ];

        if self.mode == AggregationMode::PerUpdate {
            steps.push(
                "For EACH project, set 'is_uncertain' to true if the project name or activity \
                 type is a guess, otherwise false."
                    .to_string(),
            );
            steps.push(
                "If the message as a whole is a guide or tutorial, set the top-level 'is_guide' \
                 to true and fill 'guide_summary' (1 sentence) and 'guide_subject' (what it \
                 teaches). Otherwise set 'is_guide' to false and both fields to null. Guide \
                 fields are valid even when the list is empty."
                    .to_string(),
            );
        }

        for (i, step) in steps.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, step));
        }

        prompt.push_str(
            "\nOutput ONLY the JSON object containing the \"identified_projects\" list. Do not \
             include any other text before or after the JSON. If no projects are identified, \
             the list should be empty.\n\n",
        );
        prompt.push_str("Example JSON format:\n");
        prompt.push_str(self.example());
        prompt.push_str("\n\nExample JSON format if no project identified:\n");
        prompt.push_str(self.empty_example());
        prompt.push('\n');
        prompt
    }

    fn example(&self) -> &'static str {
        match self.mode {
            AggregationMode::WholeMessage => WHOLE_MESSAGE_EXAMPLE,
            AggregationMode::PerUpdate => PER_UPDATE_EXAMPLE,
        }
    }

    fn empty_example(&self) -> &'static str {
        match self.mode {
            AggregationMode::WholeMessage => "{\n  \"identified_projects\": []\n}",
            AggregationMode::PerUpdate => {
                "{\n  \"identified_projects\": [],\n  \"is_guide\": false,\n  \"guide_summary\": null,\n  \"guide_subject\": null\n}"
            }
        }
    }
}

/// Comma-separated list of every recognized activity label.
pub fn activity_labels() -> String {
    ActivityType::KNOWN
        .iter()
        .map(|a| a.label())
        .collect::<Vec<_>>()
        .join(", ")
}

const WHOLE_MESSAGE_EXAMPLE: &str = r#"{
  "identified_projects": [
    {
      "project_name": "Project Alpha",
      "activity_type": "Testnet",
      "is_node_opportunity": true,
      "summary": "Project Alpha launched its incentivized testnet phase 2, node operators needed.",
      "key_links": ["https://alpha.example/testnet", "https://alpha.example/node-docs"],
      "referral_links": [],
      "deadline": "2025-08-01",
      "required_actions_summary": "Set up node according to docs and participate."
    },
    {
      "project_name": "Project Beta",
      "activity_type": "Airdrop Claim",
      "is_node_opportunity": false,
      "summary": "Project Beta airdrop claim is now live for early users.",
      "key_links": ["https://beta.example/claim"],
      "referral_links": [],
      "deadline": null,
      "required_actions_summary": "Check eligibility and claim tokens."
    }
  ]
}"#;

const PER_UPDATE_EXAMPLE: &str = r#"{
  "identified_projects": [
    {
      "project_name": "Project Alpha",
      "activity_type": "Testnet",
      "is_node_opportunity": true,
      "is_uncertain": false,
      "summary": "Project Alpha launched its incentivized testnet phase 2, node operators needed.",
      "key_links": ["https://alpha.example/testnet"],
      "referral_links": [],
      "deadline": "2025-08-01",
      "required_actions_summary": "Set up node according to docs and participate."
    }
  ],
  "is_guide": false,
  "guide_summary": null,
  "guide_subject": null
}"#;
