use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub company: String,
    pub role: String,
    pub duration: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub school: String,
    pub degree: String,
    pub year: String,
}

/// Canonical profile the model maps form fields onto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub location: String,
    pub linkedin: String,
    pub github: String,
    pub website: String,
    pub summary: String,
    pub experience: Vec<Experience>,
    pub education: Vec<Education>,
    pub skills: Vec<String>,
}

/// Profile fragment produced by resume parsing. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialProfile {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub website: Option<String>,
    pub summary: Option<String>,
    pub experience: Vec<Experience>,
    pub education: Vec<Education>,
    pub skills: Vec<String>,
}

impl UserProfile {
    /// Profile every new form session starts with.
    pub fn demo() -> Self {
        Self {
            full_name: "Alex Rivera".to_string(),
            email: "alex.rivera@example.com".to_string(),
            phone: "+1 (555) 123-4567".to_string(),
            location: "San Francisco, CA".to_string(),
            linkedin: "linkedin.com/in/arivera-dev".to_string(),
            github: "github.com/arivera".to_string(),
            website: "arivera.io".to_string(),
            summary: "Senior Frontend Engineer with 6 years of experience building scalable web applications. Expert in React, TypeScript, and high-performance UI systems.".to_string(),
            experience: vec![
                Experience {
                    company: "TechFlow Systems".to_string(),
                    role: "Senior Frontend Engineer".to_string(),
                    duration: "2021 - Present".to_string(),
                    description: "Led the migration of a legacy dashboard to React 18, improving TTI by 40%.".to_string(),
                },
                Experience {
                    company: "Creative Logic".to_string(),
                    role: "Software Developer".to_string(),
                    duration: "2018 - 2021".to_string(),
                    description: "Developed and maintained several high-traffic client-facing applications using Vue and Node.js.".to_string(),
                },
            ],
            education: vec![Education {
                school: "Stanford University".to_string(),
                degree: "B.S. Computer Science".to_string(),
                year: "2018".to_string(),
            }],
            skills: [
                "React",
                "TypeScript",
                "Node.js",
                "Tailwind CSS",
                "GraphQL",
                "System Design",
                "Unit Testing",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    /// Folds a parsed fragment into this profile.
    ///
    /// Non-empty scalars overwrite, experience and education entries are
    /// appended unless already present, skills are unioned ignoring case.
    pub fn merge(&mut self, partial: PartialProfile) {
        let scalars = [
            (&mut self.full_name, partial.full_name),
            (&mut self.email, partial.email),
            (&mut self.phone, partial.phone),
            (&mut self.location, partial.location),
            (&mut self.linkedin, partial.linkedin),
            (&mut self.github, partial.github),
            (&mut self.website, partial.website),
            (&mut self.summary, partial.summary),
        ];
        for (slot, incoming) in scalars {
            if let Some(value) = incoming.filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }

        for exp in partial.experience {
            let exists = self.experience.iter().any(|e| {
                e.company.eq_ignore_ascii_case(&exp.company) && e.role.eq_ignore_ascii_case(&exp.role)
            });
            if !exists {
                self.experience.push(exp);
            }
        }

        for edu in partial.education {
            let exists = self.education.iter().any(|e| {
                e.school.eq_ignore_ascii_case(&edu.school) && e.degree.eq_ignore_ascii_case(&edu.degree)
            });
            if !exists {
                self.education.push(edu);
            }
        }

        for skill in partial.skills {
            let skill = skill.trim().to_string();
            if skill.is_empty() {
                continue;
            }
            if !self.skills.iter().any(|s| s.eq_ignore_ascii_case(&skill)) {
                self.skills.push(skill);
            }
        }
    }
}
