//! CSV fixtures for annotation tests

#![allow(dead_code)]

/// Three postings, no label column yet.
pub const UNLABELED_JOBS: &str = "\
TITLE,COMPANY_NAME,JOB_DESCRIPTION
Machine Learning Engineer,Acme Robotics,\"Build and deploy deep learning models, own the MLOps stack\"
Line Cook,Harbor Grill,Prepare meals during the evening shift
Data Scientist,Globex,\"Statistical modelling; experience with \"\"LLMs\"\" a plus\"
";

/// Five postings, two already labeled (float spellings as written by
/// dataframe tools).
pub const PARTIALLY_LABELED_JOBS: &str = "\
TITLE,COMPANY_NAME,JOB_DESCRIPTION,finalAnnotation
Prompt Engineer,Initech,Design prompts for internal assistants,1.0
Accountant,Initech,Quarterly reporting,0.0
NLP Researcher,Umbrella,Research language models,
Truck Driver,Umbrella,Long-haul routes,
Computer Vision Intern,Hooli,Label and train detectors,
";

pub const MALFORMED: &str = "\
TITLE,COMPANY_NAME
only one field
";
