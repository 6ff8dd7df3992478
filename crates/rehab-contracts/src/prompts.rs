//! Prompt templates sent to the generation endpoint.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasterPrompt {
    pub title: &'static str,
    pub prompt: &'static str,
}

pub const COMPREHENSIVE_TITLE: &str = "Comprehensive Restoration";
pub const ULTIMATE_REMASTER_TITLE: &str = "Ultimate Quality Remaster";
pub const TRANSPLANT_TITLE: &str = "Unholy Face Transplant";
pub const FACE_CLOSEUP_TITLE: &str = "Identity-Preserving Close-up";

pub const MASTER_PROMPTS: &[MasterPrompt] = &[
    MasterPrompt {
        title: COMPREHENSIVE_TITLE,
        prompt: r#"Analyze the provided photograph and perform a comprehensive restoration. Your primary goal is to enhance the image to a professional quality while STRICTLY PRESERVING the original subject's identity, facial features, expression, and pose.
Tasks to perform:
1.  **Enhance Details:** Sharpen blurry areas, especially in faces, hair, and clothing textures, to bring out fine details without creating an artificial look. Synthesize plausible high-frequency detail where it's missing.
2.  **Correct Colors:** Restore faded or shifted colors to a natural and vibrant state. Ensure skin tones are accurate and realistic.
3.  **Repair Damage:** Seamlessly remove any scratches, dust, creases, or minor stains.
4.  **Balance Lighting:** Adjust exposure, contrast, and shadows to create a balanced, well-lit image. Recover details from overexposed or underexposed areas.
5.  **Reduce Noise:** Intelligently reduce digital noise and film grain while retaining essential image texture.
The final output must be a clean, high-resolution, photorealistic image. DO NOT alter the composition or the subjects' core appearance."#,
    },
    MasterPrompt {
        title: "Natural & Subtle Enhancement",
        prompt: r#"Perform a subtle and natural restoration of this photograph. The key is to make it look like a well-preserved original, not an overly processed digital image. Adhere strictly to preserving the subject's identity, facial features, expression, and pose.
Your focus should be on:
1.  **Gentle Sharpening:** Apply a light touch to improve clarity without introducing harsh edges.
2.  **Authentic Color:** Correct color casts and restore faded tones, aiming for a look that is true to the era of the photo.
3.  **Minimal Repair:** Clean up distracting dust and minor scratches but leave the original film grain and texture intact.
4.  **Soft Lighting:** Balance the light to feel natural and not overly dramatic.
The result should be a tasteful, clean version of the original photo. DO NOT change the subjects or the overall mood."#,
    },
    MasterPrompt {
        title: "Vibrant & Modern Remaster",
        prompt: r#"Remaster this photograph with a vibrant, modern aesthetic. While you must strictly preserve the subject's identity, facial features, expression, and pose, the goal is to make the image pop with color and clarity.
Execute the following:
1.  **Crisp Details:** Maximize sharpness and texture detail, making every element clear and defined.
2.  **Rich Colors:** Boost color saturation and vibrancy for a rich, contemporary feel, while keeping skin tones looking healthy and natural.
3.  **Flawless Surface:** Remove all imperfections like scratches, noise, and grain for a perfectly clean look.
4.  **Dynamic Contrast:** Enhance the contrast to create depth and a punchy, dynamic range between light and shadow.
The output should be a high-impact, polished, and modern-looking photograph."#,
    },
    MasterPrompt {
        title: "Cinematic & Artistic Grade",
        prompt: r#"Apply a cinematic and artistic grade to this photograph, treating it like a still from a high-quality film. You must absolutely preserve the original subject's identity, facial features, expression, and pose.
Your artistic direction is:
1.  **Selective Focus:** Subtly enhance the sharpness of the subject to draw the viewer's eye, while keeping the background natural.
2.  **Color Grading:** Apply a tasteful color grade to enhance the mood. You might shift the tones slightly towards warm or cool, or enhance a specific color palette within the image to create a more cohesive, artistic feel.
3.  **Cinematic Lighting:** Adjust the lighting to add a touch of drama and depth, perhaps by deepening shadows or enhancing highlights, without losing detail.
4.  **Perfect Blemishes:** Remove any distracting technical flaws (scratches, dust) while retaining the photo's inherent character.
The final image should feel emotionally resonant and professionally graded, like a frame from a movie."#,
    },
    MasterPrompt {
        title: ULTIMATE_REMASTER_TITLE,
        prompt: r#"Your task is to completely remaster the provided photograph, elevating it to the highest possible level of photorealism, as if it were captured with a top-of-the-line, professional-grade 2025 model Sony A7 series camera equipped with a G Master prime lens.

**Primary Objective:** Re-render the entire scene with breathtaking, hyper-realistic detail.

**Critical Constraint:** You MUST perfectly preserve the identity, likeness, and three-dimensional shape of the subjects' faces. Their facial structure, features, and expression are immutable. Do not alter their core appearance.

**Execution Details:**
1.  **Scene Reconstruction:** Recreate every object and background element from the original photo, but render them with ultra-high-definition textures, realistic materials, and perfect lighting.
2.  **Camera & Lens Simulation:** The final image must exhibit the characteristics of a high-end professional camera:
    *   **Clarity:** Edge-to-edge sharpness and micro-contrast. No digital noise or film grain.
    *   **Color:** Rich, vibrant, and accurate color science. Skin tones must be flawless and natural.
    *   **Lighting:** Natural and dynamic lighting with soft, detailed shadows and clean highlights.
    *   **Optics:** Simulate a shallow depth of field to create a beautiful separation between the subject and background, with creamy, aesthetically pleasing bokeh.
3.  **Overall Aesthetic:** The final output should be a pristine, jaw-droppingly detailed photograph that is indistinguishable from a modern, high-budget professional photoshoot."#,
    },
];

pub const FACE_DETECTION_PROMPT: &str = r#"Analyze the provided image and identify only the distinct human faces of the **primary, foreground subjects**. Ignore faces that are out of focus, in the distant background, or part of a crowd.

Return a JSON object with a single key "faces" which is an array of objects. For each identified primary face, provide:
1.  A brief, unique description that **MUST include their position in the frame** (e.g., "the woman on the far left").
2.  A "boundingBox" object with the pixel coordinates { "x": <left>, "y": <top>, "width": <width>, "height": <height> }.

Example response:
{
  "faces": [
    {
      "description": "the woman with blonde hair on the left",
      "boundingBox": { "x": 150, "y": 200, "width": 100, "height": 120 }
    }
  ]
}"#;

pub const CLOSEUP_MARGIN_PX: u32 = 5;

pub fn master_prompt(title: &str) -> Option<&'static MasterPrompt> {
    MASTER_PROMPTS.iter().find(|item| item.title == title)
}

/// 1-based catalog index or case-insensitive title.
pub fn resolve_master_prompt(reference: &str) -> Option<&'static MasterPrompt> {
    let trimmed = reference.trim();
    if let Ok(index) = trimmed.parse::<usize>() {
        return index.checked_sub(1).and_then(|idx| MASTER_PROMPTS.get(idx));
    }
    MASTER_PROMPTS
        .iter()
        .find(|item| item.title.eq_ignore_ascii_case(trimmed))
}

pub fn face_closeup_prompt(description: &str) -> String {
    format!(
        r#"From the original photograph provided, generate an extreme close-up, tightly cropped headshot of ONLY the person described as: "{description}".

CRITICAL INSTRUCTIONS:
1.  The subject's face MUST fill the entire frame, with nothing else but the same face, angled the same way, and white background showing in the places where there is no face. Do not show clothes, shoulders, arms, chest, or neck. The bottom of the same angled chin should be {margin} pixels away from the bottom of the frame, and the top part of the original same angled hair should be {margin} pixels from the top of the frame.
2.  The background MUST be pure white (#FFFFFF).
3.  You MUST perfectly preserve the subject's identity, facial structure, expression, and the angle of their head.
4.  **The output must be a hyper-detailed, photorealistic image, matching the artistic style of a modern, professional-grade photograph.** This is crucial for ensuring it can be seamlessly blended into a remastered image later."#,
        margin = CLOSEUP_MARGIN_PX,
    )
}

pub fn face_transplant_prompt(descriptions: &[String]) -> String {
    let mut prompt = String::from(
        "You are an expert digital artist performing a delicate face transplant. You have been given multiple images to work with:\n\n",
    );
    prompt.push_str("- **The Base Image:** This is the main, high-quality photograph that the new faces should be integrated into. The faces in this image are the ones you will be replacing.\n\n");
    prompt.push_str(&format!(
        "- **The Face Reference Images:** You have also been given {} separate close-up images. Each one is a highly detailed, accurate portrait of a specific person. The descriptions for these face references are:\n",
        descriptions.len()
    ));
    for (index, description) in descriptions.iter().enumerate() {
        prompt.push_str(&format!(
            "  - Face Reference {}: A close-up of \"{}\".\n",
            index + 1,
            description
        ));
    }
    prompt.push('\n');

    let example = descriptions.first().map(String::as_str).unwrap_or_default();
    prompt.push_str(&format!(
        "Your task is to seamlessly replace EACH face in **The Base Image** with its corresponding, more accurate version from the **Face Reference Images**. For example, find the person in the base image who matches the description \"{example}\" and replace their face with the corresponding reference image. Do this for all provided face references.\n\n"
    ));
    prompt.push_str("CRITICAL INSTRUCTIONS:\n");
    prompt.push_str("1.  The final output image MUST have the exact same dimensions, aspect ratio, and composition as **The Base Image**.\n");
    prompt.push_str("2.  Only modify the facial regions. Do not crop or alter any other part of the base image (background, clothing, etc.).\n");
    prompt.push_str("3.  Ensure the final image retains the overall high-fidelity lighting, color grading, and texture of **The Base Image** while perfectly integrating the identity and expression from each face reference. The transitions must be invisible.\n");
    prompt
}
