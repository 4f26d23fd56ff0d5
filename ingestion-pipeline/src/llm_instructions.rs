//! System messages, prompt builders and response schemas for the ingestion
//! LLM calls.

pub const SHORT_DOC_SUMMARY_SYSTEM: &str =
    "You are an expert document analyst. Create clear, accurate, and comprehensive summaries.";

pub const SECTION_SUMMARY_SYSTEM: &str =
    "You are an expert at summarizing document sections concisely.";

pub const FINAL_SUMMARY_SYSTEM: &str =
    "You are an expert at creating comprehensive document summaries.";

pub const QA_GENERATION_SYSTEM: &str =
    "You are an expert at generating diverse question-answer pairs for document retrieval systems.";

pub fn short_doc_summary_prompt(content: &str, filename: &str, mime_type: &str) -> String {
    format!(
        "Create a clear, accurate, and comprehensive summary of this document.\n\n\
        ## Document Information\n\
        - Filename: {filename}\n\
        - Type: {mime_type}\n\n\
        ## Document Content\n\
        {content}\n\n\
        ## Required Output Structure\n\n\
        ### Overview\n\
        A 2-3 sentence high-level description of what this document is about.\n\n\
        ### Key Points\n\
        The most important information (3-7 bullet points).\n\n\
        ### Important Data\n\
        Key numbers, dates, names, and specific requirements.\n\n\
        ### Conclusions\n\
        Main conclusions, recommendations, or action items (if present).\n\n\
        Target length: 200-400 words. Write in the same language as the source document."
    )
}

pub fn section_summary_prompt(title: &str, content: &str) -> String {
    format!(
        "Summarize this section of the document:\n\n\
        ## Section: {title}\n\n\
        {content}\n\n\
        Provide a concise summary (2-3 sentences) focusing on key points. \
        Reply in the same language as the section."
    )
}

pub fn final_summary_prompt(filename: &str, section_summaries: &str) -> String {
    format!(
        "Create a comprehensive summary of the document based on these section summaries:\n\n\
        Document: {filename}\n\n\
        {section_summaries}\n\n\
        Provide a unified summary with:\n\
        1. Overview (2-3 sentences)\n\
        2. Key Points (3-5 bullet points)\n\
        3. Main Conclusions (if applicable)\n\n\
        Write in the same language as the document."
    )
}

pub fn qa_document_prompt(
    content: &str,
    filename: &str,
    mime_type: &str,
    num_questions: usize,
) -> String {
    format!(
        "Generate {num_questions} diverse question-answer pairs for a document retrieval system.\n\n\
        ## Document Information\n\
        - Filename: {filename}\n\
        - Type: {mime_type}\n\n\
        ## Document Content\n\
        {content}\n\n\
        ## Guidelines\n\
        - Questions must be self-contained (understandable without context)\n\
        - Answers must be directly supported by the document - no assumptions\n\
        - Cover different sections and topics from the document\n\n\
        ## Question Types to Include\n\
        - **Factual**: specific facts, numbers, dates, names\n\
        - **Overview**: general questions about purpose or topic\n\
        - **Procedural**: how-to, processes, steps\n\
        - **Comparison**: comparing items, periods, options\n\
        - **Reasoning**: why questions, causes, explanations\n\n\
        Generate questions in the same language as the source document."
    )
}

pub fn qa_section_prompt(title: &str, content: &str, num_questions: usize) -> String {
    format!(
        "Generate {num_questions} diverse question-answer pairs for this section.\n\n\
        ## Section: {title}\n\n\
        {content}\n\n\
        Generate questions that:\n\
        - Are self-contained (understandable without context)\n\
        - Have answers directly supported by the section\n\
        - Cover different aspects of the section\n\
        - Include various types: factual, overview, procedural, comparison, reasoning\n\n\
        Write questions in the same language as the document."
    )
}

/// Strict response schema for Q&A generation.
pub fn qa_response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "qa_pairs": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": { "type": "string" },
                        "answer": { "type": "string" },
                        "type": {
                            "type": "string",
                            "enum": ["factual", "overview", "procedural", "comparison", "reasoning"]
                        }
                    },
                    "required": ["question", "answer", "type"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["qa_pairs"],
        "additionalProperties": false
    })
}
