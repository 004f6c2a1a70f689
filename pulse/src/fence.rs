//! Code extraction from LLM replies.
//!
//! Precedence: the first ```python fenced block, else the first fenced
//! block with any other tag (or none), else the trimmed raw text.

struct FencedBlock {
    tag: String,
    content: String,
}

/// Extract the code payload from an LLM reply.
///
/// Collaborators wrap code in markdown fences more often than not, but the
/// format is not guaranteed. A reply with no fences at all is treated as
/// bare code and returned trimmed.
pub fn extract_code(text: &str) -> String {
    let (blocks, saw_fence) = collect_blocks(text);

    if let Some(block) = blocks
        .iter()
        .find(|b| b.tag == "python" || b.tag == "py" || b.tag == "python3")
    {
        return block.content.trim_end().to_string();
    }
    if let Some(block) = blocks.first() {
        return block.content.trim_end().to_string();
    }
    if saw_fence {
        // Fences were present but carried nothing; the prose around them
        // is not code.
        return String::new();
    }
    text.trim().to_string()
}

fn collect_blocks(text: &str) -> (Vec<FencedBlock>, bool) {
    let mut blocks = Vec::new();
    let mut saw_fence = false;
    let mut current: Option<FencedBlock> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            saw_fence = true;
            match current.take() {
                Some(block) => {
                    if !block.content.trim().is_empty() {
                        blocks.push(block);
                    }
                }
                None => {
                    current = Some(FencedBlock {
                        tag: rest.trim().to_ascii_lowercase(),
                        content: String::new(),
                    });
                }
            }
        } else if let Some(block) = current.as_mut() {
            block.content.push_str(line);
            block.content.push('\n');
        }
    }

    // A fence the model never closed still counts; truncated replies are
    // common and the rest of the text is the block body.
    if let Some(block) = current {
        if !block.content.trim().is_empty() {
            blocks.push(block);
        }
    }

    (blocks, saw_fence)
}
