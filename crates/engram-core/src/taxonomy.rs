//! Closed noun/verb taxonomies. Both enums serialize as their camelCase
//! string tag; parsing an unknown tag is a validation error at the API
//! boundary, never a panic.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// Entity (noun) type tag. The taxonomy is closed: 42 values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString, EnumCount, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum NounType {
    Person,
    Organization,
    Team,
    Place,
    Event,
    Meeting,
    Concept,
    Topic,
    Skill,
    Document,
    Article,
    Book,
    Note,
    Message,
    Email,
    Webpage,
    File,
    Image,
    Video,
    Audio,
    Dataset,
    Model,
    Experiment,
    Hypothesis,
    Question,
    Answer,
    Claim,
    Source,
    Quote,
    Definition,
    Task,
    Project,
    Goal,
    Process,
    Metric,
    Product,
    Service,
    Tool,
    Device,
    Application,
    Collection,
    Thing,
}

impl NounType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Relationship (verb) type tag. The taxonomy is closed: 127 values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString, EnumCount, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum VerbType {
    // Generic association
    RelatedTo,
    References,
    Mentions,
    LinkedTo,
    SimilarTo,
    OppositeOf,
    SynonymOf,
    InstanceOf,
    // Hierarchy and containment
    HasInstance,
    SubclassOf,
    SuperclassOf,
    PartOf,
    HasPart,
    Contains,
    ContainedIn,
    MemberOf,
    // Organisational
    HasMember,
    WorksFor,
    Employs,
    Owns,
    OwnedBy,
    Manages,
    ManagedBy,
    Leads,
    LedBy,
    ReportsTo,
    HasReport,
    CollaboratesWith,
    Knows,
    Trusts,
    TrustedBy,
    Mentors,
    // People
    MentoredBy,
    Teaches,
    TaughtBy,
    Influences,
    InfluencedBy,
    CommunicatesWith,
    Follows,
    FollowedBy,
    // Temporal and causal
    Precedes,
    Succeeds,
    Causes,
    CausedBy,
    Enables,
    EnabledBy,
    Prevents,
    PreventedBy,
    // Creation and authorship
    Created,
    CreatedBy,
    Authored,
    AuthoredBy,
    Produced,
    ProducedBy,
    Modified,
    ModifiedBy,
    // Spatial
    LocatedIn,
    LocationOf,
    Near,
    AdjacentTo,
    Within,
    Surrounds,
    TravelsTo,
    OriginatesFrom,
    // Documents and citation
    Cites,
    CitedBy,
    Quotes,
    QuotedBy,
    Summarizes,
    SummarizedBy,
    Translates,
    TranslationOf,
    // Semantics
    Describes,
    DescribedBy,
    Defines,
    DefinedBy,
    Explains,
    ExplainedBy,
    Illustrates,
    IllustratedBy,
    // Question answering and argumentation
    Asks,
    AskedBy,
    Answers,
    AnsweredBy,
    Supports,
    SupportedBy,
    Contradicts,
    ContradictedBy,
    // Derivation and versioning
    DerivedFrom,
    SourceOf,
    VersionOf,
    HasVersion,
    Replaces,
    ReplacedBy,
    DuplicateOf,
    CopyOf,
    // Software and systems
    DependsOn,
    DependencyOf,
    Implements,
    ImplementedBy,
    Extends,
    ExtendedBy,
    Uses,
    UsedBy,
    // Process
    Requires,
    RequiredBy,
    Consumes,
    ConsumedBy,
    Transforms,
    TransformedBy,
    Measures,
    MeasuredBy,
    // Evaluation
    Evaluates,
    EvaluatedBy,
    Validates,
    ValidatedBy,
    Approves,
    ApprovedBy,
    Rejects,
    RejectedBy,
    // Participation
    ParticipatesIn,
    HasParticipant,
    Attends,
    AttendedBy,
    Hosts,
    HostedBy,
    Organizes,
}

impl VerbType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// The verb with source/target reversed, where one exists in the
    /// taxonomy. Used for `bidirectional` relate.
    pub fn inverse(&self) -> Option<VerbType> {
        use VerbType::*;
        let inv = match self {
            RelatedTo => RelatedTo,
            LinkedTo => LinkedTo,
            SimilarTo => SimilarTo,
            OppositeOf => OppositeOf,
            SynonymOf => SynonymOf,
            InstanceOf => HasInstance,
            HasInstance => InstanceOf,
            SubclassOf => SuperclassOf,
            SuperclassOf => SubclassOf,
            PartOf => HasPart,
            HasPart => PartOf,
            Contains => ContainedIn,
            ContainedIn => Contains,
            MemberOf => HasMember,
            HasMember => MemberOf,
            WorksFor => Employs,
            Employs => WorksFor,
            Owns => OwnedBy,
            OwnedBy => Owns,
            Manages => ManagedBy,
            ManagedBy => Manages,
            Leads => LedBy,
            LedBy => Leads,
            ReportsTo => HasReport,
            HasReport => ReportsTo,
            CollaboratesWith => CollaboratesWith,
            Trusts => TrustedBy,
            TrustedBy => Trusts,
            Mentors => MentoredBy,
            MentoredBy => Mentors,
            Teaches => TaughtBy,
            TaughtBy => Teaches,
            Influences => InfluencedBy,
            InfluencedBy => Influences,
            CommunicatesWith => CommunicatesWith,
            Follows => FollowedBy,
            FollowedBy => Follows,
            Precedes => Succeeds,
            Succeeds => Precedes,
            Causes => CausedBy,
            CausedBy => Causes,
            Enables => EnabledBy,
            EnabledBy => Enables,
            Prevents => PreventedBy,
            PreventedBy => Prevents,
            Created => CreatedBy,
            CreatedBy => Created,
            Authored => AuthoredBy,
            AuthoredBy => Authored,
            Produced => ProducedBy,
            ProducedBy => Produced,
            Modified => ModifiedBy,
            ModifiedBy => Modified,
            LocatedIn => LocationOf,
            LocationOf => LocatedIn,
            Near => Near,
            AdjacentTo => AdjacentTo,
            Cites => CitedBy,
            CitedBy => Cites,
            Quotes => QuotedBy,
            QuotedBy => Quotes,
            Summarizes => SummarizedBy,
            SummarizedBy => Summarizes,
            Describes => DescribedBy,
            DescribedBy => Describes,
            Defines => DefinedBy,
            DefinedBy => Defines,
            Explains => ExplainedBy,
            ExplainedBy => Explains,
            Illustrates => IllustratedBy,
            IllustratedBy => Illustrates,
            Asks => AskedBy,
            AskedBy => Asks,
            Answers => AnsweredBy,
            AnsweredBy => Answers,
            Supports => SupportedBy,
            SupportedBy => Supports,
            Contradicts => ContradictedBy,
            ContradictedBy => Contradicts,
            DerivedFrom => SourceOf,
            SourceOf => DerivedFrom,
            VersionOf => HasVersion,
            HasVersion => VersionOf,
            Replaces => ReplacedBy,
            ReplacedBy => Replaces,
            DependsOn => DependencyOf,
            DependencyOf => DependsOn,
            Implements => ImplementedBy,
            ImplementedBy => Implements,
            Extends => ExtendedBy,
            ExtendedBy => Extends,
            Uses => UsedBy,
            UsedBy => Uses,
            Requires => RequiredBy,
            RequiredBy => Requires,
            Consumes => ConsumedBy,
            ConsumedBy => Consumes,
            Transforms => TransformedBy,
            TransformedBy => Transforms,
            Measures => MeasuredBy,
            MeasuredBy => Measures,
            Evaluates => EvaluatedBy,
            EvaluatedBy => Evaluates,
            Validates => ValidatedBy,
            ValidatedBy => Validates,
            Approves => ApprovedBy,
            ApprovedBy => Approves,
            Rejects => RejectedBy,
            RejectedBy => Rejects,
            ParticipatesIn => HasParticipant,
            HasParticipant => ParticipatesIn,
            Attends => AttendedBy,
            AttendedBy => Attends,
            Hosts => HostedBy,
            HostedBy => Hosts,
            _ => return None,
        };
        Some(inv)
    }
}
