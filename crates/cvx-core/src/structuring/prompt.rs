//! Extraction prompt.

const PREAMBLE: &str = "You are a data extraction specialist tasked with converting unstructured \
text from a scanned résumé into a structured JSON format. Your goal is to accurately extract and \
normalize relevant professional information.";

const SCHEMA: &str = r#"### Output:
Return **only** a valid JSON object with the following structure (no explanations or comments):

{
  "nom": "",                          // first initial + dot + space + first three letters of the last name, e.g. "S. CHA" for Soufiane Chaker
  "titre": "",                        // generated from the overall profile
  "competences": {
    "langages_programmation": [],     // e.g. "Python", "Java"
    "logiciels_techniques": [],       // e.g. "AutoCAD", "Tableau"
    "competences_generales": [],      // e.g. "Communication", "Problem-solving"
    "competences_manageriales": []    // e.g. "Leadership", "Team management"
  },
  "experience_professionnelle": [
    {
      "titre_poste": "",              // job title; include the client company when the description names one ("... pour Toyota")
      "entreprise": "",               // company name, when separable from the job title
      "periode": "",                  // duration or date range
      "description": ""               // tasks and responsibilities as bullet points
    }
  ],
  "formation": [
    {
      "diplome": "",
      "etablissement": "",
      "dates": ""
    }
  ],
  "langues": []                       // e.g. "Français – Courant", "Anglais – Intermédiaire"
}"#;

const RULES: &str = r#"### Additional Rules:

1. Remove introductory sections such as "Profil" or "Profil professionnel". They must not appear in the output.
2. When one position lists several client engagements, replace "description" with "missions": [{"client": "", "periode": "", "description": ""}], one entry per engagement.
3. If a section titled "Compétences professionnelles" (or similar) is present, add the key "competences_professionnelles": [] to the object.
4. If a certifications section is present ("Certifications", "Certificats", ...), add the key "certifications": [] to the object.
5. Only add these optional keys when their sections clearly exist in the input text.
6. Ensure the output is fully valid JSON. Do not include any text outside the JSON object."#;

/// Build the extraction prompt around the document text.
pub fn build_prompt(text: &str) -> String {
    format!("{PREAMBLE}\n\n---\n\n### Input:\n\"\"\"{text}\"\"\"\n\n{SCHEMA}\n\n{RULES}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::REQUIRED_KEYS;

    #[test]
    fn test_prompt_embeds_text_and_schema() {
        let prompt = build_prompt("Jean Dupont Ingénieur logiciel");
        assert!(prompt.contains("\"\"\"Jean Dupont Ingénieur logiciel\"\"\""));
        for key in REQUIRED_KEYS {
            assert!(prompt.contains(&format!("\"{key}\"")), "prompt lacks {key}");
        }
        assert!(prompt.contains("missions"));
        assert!(prompt.contains("certifications"));
    }
}
