pub const RAG_SYSTEM_PROMPT: &str = "You are an expert assistant extracting policy answers.";

pub fn build_context<S: AsRef<str>>(chunks: &[S]) -> String {
    chunks
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_answer_prompt(context: &str, question: &str) -> String {
    format!(
        "Use the following information to answer the question:\n{}\n\nQuestion: {}",
        context, question
    )
}
