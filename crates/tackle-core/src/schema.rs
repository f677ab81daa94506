//! Property keys and edge labels of the records stored in the central graph.
//!
//! Names match what the analysis worker writes into its result graph, so
//! imported elements and hub-created records can be queried uniformly.

/// Owning entity records.
pub mod analysis {
    pub const TYPE: &str = "AnalysisModel";
    /// Not "analysisId", which is the isolation tag.
    pub const ID: &str = "AnalysisModel-Id";
    pub const STATUS: &str = "AnalysisModel-Status";
    pub const LAST_UPDATE: &str = "AnalysisModel-LastUpdate";
    pub const CREATED: &str = "AnalysisModel-Created";
    /// Analysis -> run edge.
    pub const OWNS: &str = "AnalysisModel-Owns";
}

/// Run records.
pub mod execution {
    pub const TYPE: &str = "WindupExecutionModel";
    pub const ID: &str = "windupExecutionModelId";
    /// Not "outputPath", which is a configuration edge label.
    pub const OUTPUT_PATH: &str = "resultPath";
    pub const TIME_QUEUED: &str = "timeQueued";
    pub const TIME_STARTED: &str = "timeStarted";
    pub const TIME_FINISHED: &str = "timeFinished";
    pub const WORK_TOTAL: &str = "workTotal";
    pub const WORK_COMPLETED: &str = "workCompleted";
    pub const CURRENT_TASK: &str = "currentTask";
    pub const LAST_MODIFIED: &str = "lastModified";
    pub const STATE: &str = "state";
    pub const APPLICATION_FILE_NAME: &str = "applicationFileName";
    pub const TOTAL_STORY_POINT: &str = "totalStoryPoint";
    pub const NUMBER_ISSUES_PER_CATEGORY: &str = "numberIssuesPerCategory";
    pub const USES_CONFIGURATION: &str = "uses";
    pub const USES_JAVA_CONFIGURATION: &str = "usesJavaConfiguration";
}

/// General analysis configuration produced by the worker.
pub mod configuration {
    pub const TYPE: &str = "WindupConfigurationModel";
    pub const INPUT_PATH: &str = "inputPath";
    pub const USER_RULES_PATH: &str = "userRulesPath";
    pub const USER_LABELS_PATH: &str = "userLabelsPath";
    pub const USER_IGNORE_PATH: &str = "userIgnorePath";
    pub const OUTPUT_PATH: &str = "outputPath";
    pub const SOURCE_TECHNOLOGY: &str = "sourceTechnology";
    pub const TARGET_TECHNOLOGY: &str = "targetTechnology";

    /// Edges whose targets belong to the configuration subgraph.
    pub const EDGE_LABELS: &[&str] = &[
        INPUT_PATH,
        USER_RULES_PATH,
        USER_LABELS_PATH,
        USER_IGNORE_PATH,
        OUTPUT_PATH,
        SOURCE_TECHNOLOGY,
        TARGET_TECHNOLOGY,
    ];
}

/// Java-specific configuration produced by the worker.
pub mod java_configuration {
    pub const TYPE: &str = "WindupJavaConfiguration";
    pub const SOURCE_MODE: &str = "sourceMode";
    pub const SCAN_JAVA_PACKAGES: &str = "scanJavaPackages";
    pub const IGNORED_FILES: &str = "ignoredFiles";
    pub const EXCLUDE_JAVA_PACKAGES: &str = "excludeJavaPackages";
    pub const ADDITIONAL_CLASSPATHS: &str = "additionalClasspaths";

    pub const EDGE_LABELS: &[&str] = &[
        SCAN_JAVA_PACKAGES,
        IGNORED_FILES,
        EXCLUDE_JAVA_PACKAGES,
        ADDITIONAL_CLASSPATHS,
    ];
}

pub mod technology {
    pub const TYPE: &str = "TechnologyReferenceModel";
    pub const TECHNOLOGY_ID: &str = "technologyID";
}

pub mod package {
    pub const TYPE: &str = "PackageModel";
    pub const NAME: &str = "packageName";
}

pub mod effort_report {
    pub const TYPE: &str = "EffortReportModel";
    pub const EFFORT: &str = "EffortReportModelEffort";
    pub const ISSUE_CATEGORY: &str = "issueCategory";
}

pub mod issue_category {
    pub const TYPE: &str = "IssueCategoryModel";
    pub const NAME: &str = "name";
}

pub mod inline_hint {
    pub const TYPE: &str = "InlineHintModel";
    pub const TITLE: &str = "title";
    pub const MESSAGE: &str = "message";
    pub const RULE_ID: &str = "ruleID";
    pub const LINE_NUMBER: &str = "lineNumber";
}
